//! MCP protocol surface.
//!
//! Maps the MCP method set onto the JSON-RPC dispatcher and the tool
//! handlers.

pub mod service;

pub use service::{SERVER_NAME, SERVER_VERSION, build_dispatcher};
