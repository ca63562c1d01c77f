//! Ads MCP Server Library
//!
//! Exposes an advertising campaign metrics database to AI assistants through
//! the Model Context Protocol. The core is a newline-delimited JSON-RPC
//! multiplexer ([`rpc`]) with per-request deadlines and heartbeats, bound to
//! stdio, TCP and SSE transports.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod rpc;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{AdsError, AdsResult};
pub use rpc::{Dispatcher, ServerContext};
pub use tools::AdsTools;
