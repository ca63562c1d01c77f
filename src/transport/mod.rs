//! Transport layer for the MCP server.
//!
//! Every transport drives the same [`crate::rpc::Connection`] machinery:
//! - Stdio: one connection on the process's stdin/stdout
//! - TCP: one connection per accepted socket, with heartbeats
//! - SSE: an event stream per session plus a POST endpoint for requests

pub mod sse;
pub mod stdio;
pub mod tcp;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;

use crate::error::{AdsError, AdsResult};
use serde_json::json;
use std::future::Future;
use std::io::{ErrorKind, Write};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Trait for MCP transport implementations.
pub trait Transport: Send + Sync {
    /// Start the transport and serve until shutdown.
    fn run(&self) -> impl Future<Output = AdsResult<()>> + Send;

    /// Get the name of this transport for logging.
    fn name(&self) -> &'static str;
}

/// Bind `host:base_port`, moving to the next port while the address is in
/// use. Returns the listener and the port actually bound.
pub async fn bind_with_retry(
    host: &str,
    base_port: u16,
    attempts: u16,
) -> AdsResult<(TcpListener, u16)> {
    let attempts = attempts.max(1);
    let last = base_port.saturating_add(attempts - 1);

    for port in base_port..=last {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener.local_addr()?.port();
                if port != base_port {
                    info!(requested = base_port, bound, "Bound to fallback port");
                }
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(host = %host, port, "Port in use, trying next");
            }
            Err(e) => {
                return Err(AdsError::Bind {
                    addr: format!("{}:{}", host, port),
                    source: e,
                });
            }
        }
    }

    Err(AdsError::PortsExhausted {
        host: host.to_string(),
        first: base_port,
        last,
    })
}

/// The startup line written to stdout once a listener is bound.
pub fn listening_line(protocol: &str, host: &str, port: u16) -> String {
    json!({
        "event": "listening",
        "protocol": protocol,
        "host": host,
        "port": port,
    })
    .to_string()
}

/// Print the startup line so supervisors can discover the bound port.
pub fn announce_listening(protocol: &str, host: &str, port: u16) -> AdsResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", listening_line(protocol, host, port))?;
    stdout.flush()?;
    info!(protocol, host = %host, port, "Listening");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_listening_line_shape() {
        let line = listening_line("tcp", "127.0.0.1", 3001);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "listening");
        assert_eq!(value["protocol"], "tcp");
        assert_eq!(value["port"], 3001);
        assert!(!line.contains('\n'));
    }

    #[tokio::test]
    async fn test_bind_skips_busy_port() {
        let (busy, busy_port) = bind_with_retry("127.0.0.1", 0, 1).await.unwrap();
        let (_next, port) = bind_with_retry("127.0.0.1", busy_port, 3).await.unwrap();
        assert_ne!(port, busy_port);
        drop(busy);
    }

    #[tokio::test]
    async fn test_bind_exhaustion_is_fatal() {
        let (_busy, busy_port) = bind_with_retry("127.0.0.1", 0, 1).await.unwrap();
        let err = bind_with_retry("127.0.0.1", busy_port, 1).await.unwrap_err();
        assert!(matches!(err, AdsError::PortsExhausted { first, last, .. } if first == busy_port && last == busy_port));
        assert!(err.is_fatal());
    }
}
