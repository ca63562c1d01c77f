//! A single peer channel bound to the shared dispatcher.
//!
//! [`Connection`] is transport-agnostic: TCP and stdio feed it from a
//! [`FrameReader`] via [`serve`], the SSE transport feeds it POST bodies.
//! Every transport therefore shares the same parse → dispatch → track path.

use crate::rpc::dispatcher::{Dispatch, Dispatcher};
use crate::rpc::framing::{DEFAULT_MAX_LINE_BYTES, Frame, FrameReader, LineBuffer};
use crate::rpc::heartbeat::Heartbeat;
use crate::rpc::message::{
    Incoming, Notification, Request, Response, RpcError, parse_line,
};
use crate::rpc::outbound::{Outbound, spawn_writer};
use crate::rpc::tracker::{DEFAULT_REQUEST_TIMEOUT, RequestTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// How long to wait for the writer to flush after the peer disconnects.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection policy shared by every connection of a transport.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Deadline for asynchronous handlers.
    pub request_timeout: Duration,
    /// Heartbeat period; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Read idle timeout. Expiry is logged only, the connection stays open.
    pub idle_timeout: Option<Duration>,
    pub max_line_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: None,
            idle_timeout: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Process-scoped state handed to every transport.
#[derive(Debug)]
pub struct ServerContext {
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
}

impl ServerContext {
    pub fn new(dispatcher: Dispatcher, settings: ConnectionSettings) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Arc::new(dispatcher),
            settings,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Same dispatcher, different connection policy.
    pub fn with_settings(&self, settings: ConnectionSettings) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: self.dispatcher.clone(),
            settings,
        })
    }
}

pub struct Connection {
    peer: String,
    dispatcher: Arc<Dispatcher>,
    tracker: RequestTracker,
    outbound: Outbound,
    max_line_bytes: usize,
}

impl Connection {
    pub fn new(peer: impl Into<String>, ctx: &ServerContext, outbound: Outbound) -> Self {
        let settings = ctx.settings();
        Self {
            peer: peer.into(),
            dispatcher: ctx.dispatcher().clone(),
            tracker: RequestTracker::new(outbound.clone(), settings.request_timeout),
            outbound,
            max_line_bytes: settings.max_line_bytes,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Line(line) => self.handle_line(&line),
            Frame::Invalid(e) => {
                warn!(peer = %self.peer, error = %e, "Discarding undecodable line");
                self.send(Response::error(None, RpcError::parse_error(e.to_string())));
            }
        }
    }

    /// Handle a text body that may hold several newline-separated envelopes.
    pub fn handle_text(&self, text: &str) {
        let mut buffer = LineBuffer::with_limit(self.max_line_bytes);
        buffer.push(text.as_bytes());
        while let Some(frame) = buffer.next_frame() {
            self.handle_frame(frame);
        }
        if let Some(frame) = buffer.finish() {
            self.handle_frame(frame);
        }
    }

    /// Parse and act on one line. Never fails: every problem becomes a
    /// JSON-RPC error on the wire or a log entry.
    pub fn handle_line(&self, line: &str) {
        match parse_line(line) {
            Ok(Incoming::Request(request)) => self.handle_request(request),
            Ok(Incoming::Notification(notification)) => self.handle_notification(notification),
            Ok(Incoming::Response(_)) => {
                debug!(peer = %self.peer, "Ignoring response sent by peer");
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "Malformed message");
                self.send(Response::error(None, RpcError::parse_error(e.to_string())));
            }
        }
    }

    fn handle_request(&self, request: Request) {
        let Request { id, method, params } = request;
        debug!(peer = %self.peer, id = %id, method = %method, "Request received");

        match self.dispatcher.dispatch(&method, params) {
            Dispatch::Ready(result) => {
                if let Err(e) = &result {
                    debug!(peer = %self.peer, id = %id, code = e.code, error = %e.message, "Request failed");
                }
                self.send(Response::from_result(id, result));
            }
            Dispatch::Pending(work) => {
                if let Err(e) = self.tracker.track(id.clone(), &method, work) {
                    warn!(peer = %self.peer, id = %id, method = %method, "Rejected duplicate request id");
                    self.send(Response::error(Some(id), e));
                }
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        let Notification { method, params } = notification;
        match self.dispatcher.dispatch(&method, params) {
            Dispatch::Ready(Ok(_)) => {
                debug!(peer = %self.peer, method = %method, "Notification handled");
            }
            Dispatch::Ready(Err(e)) => {
                debug!(peer = %self.peer, method = %method, error = %e.message, "Notification ignored");
            }
            Dispatch::Pending(work) => {
                let timeout = self.tracker.timeout();
                let peer = self.peer.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, work).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            debug!(peer = %peer, method = %method, error = %e.message, "Notification failed");
                        }
                        Err(_) => {
                            warn!(peer = %peer, method = %method, "Notification handler timed out");
                        }
                    }
                });
            }
        }
    }

    fn send(&self, response: Response) {
        if !self.outbound.send(&response) {
            warn!(peer = %self.peer, "Transport not writable; response dropped");
        }
    }

    /// Abort all pending requests.
    pub fn close(&self) {
        let aborted = self.tracker.abort_all();
        if aborted > 0 {
            info!(peer = %self.peer, aborted, "Connection closed with pending requests");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.tracker.abort_all();
    }
}

/// Run one connection over a reader/writer pair until the peer disconnects
/// or the writer fails.
///
/// At end of input the connection waits for in-flight requests to settle
/// (each is bounded by its deadline) so a half-closed peer still receives its
/// responses, then shuts the writer down.
pub async fn serve<R, W>(ctx: Arc<ServerContext>, peer: String, reader: R, writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let settings = ctx.settings().clone();
    let (outbound, rx) = Outbound::channel();
    let writer_task = spawn_writer(writer, rx, peer.clone());
    let connection = Connection::new(peer.clone(), &ctx, outbound.clone());
    let heartbeat = settings
        .heartbeat_interval
        .map(|interval| Heartbeat::spawn(outbound.clone(), interval));

    info!(peer = %peer, "Connection opened");
    let mut frames = FrameReader::new(reader, settings.max_line_bytes);

    loop {
        let read = async {
            match settings.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, frames.next_frame()).await.ok(),
                None => Some(frames.next_frame().await),
            }
        };
        // A dead writer ends the connection even while the reader stays open.
        let next = tokio::select! {
            next = read => next,
            _ = outbound.closed() => {
                warn!(peer = %peer, "Transport not writable, closing connection");
                break;
            }
        };
        let Some(next) = next else {
            let idle_secs = settings.idle_timeout.map(|d| d.as_secs()).unwrap_or_default();
            info!(peer = %peer, idle_secs, "Connection idle");
            continue;
        };

        match next {
            Ok(Some(frame)) => connection.handle_frame(frame),
            Ok(None) => {
                debug!(peer = %peer, "Peer closed its side");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Read error");
                break;
            }
        }
    }

    tokio::select! {
        _ = connection.tracker().wait_idle() => {}
        _ = outbound.closed() => {}
    }

    drop(heartbeat);
    connection.close();
    drop(connection);
    drop(outbound);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_task)
        .await
        .is_err()
    {
        warn!(peer = %peer, "Writer did not drain in time");
    }
    info!(peer = %peer, "Connection closed");
}
