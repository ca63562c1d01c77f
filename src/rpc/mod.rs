//! Newline-delimited JSON-RPC 2.0 multiplexer.
//!
//! Leaf to root: [`framing`] splits bytes into lines, [`message`] parses
//! envelopes, [`dispatcher`] maps methods to handlers, [`tracker`] bounds
//! async handlers with a deadline, [`connection`] glues them to a transport.

pub mod connection;
pub mod dispatcher;
pub mod framing;
pub mod heartbeat;
pub mod message;
pub mod outbound;
pub mod tracker;

pub use connection::{Connection, ConnectionSettings, ServerContext, serve};
pub use dispatcher::{Dispatch, Dispatcher, DispatcherBuilder, HandlerFuture, HandlerResult};
pub use framing::{Frame, FrameReader, LineBuffer};
pub use heartbeat::Heartbeat;
pub use message::{RequestId, Response, RpcError, codes};
pub use outbound::Outbound;
pub use tracker::{PendingRequest, RequestState, RequestTracker};
