//! Outbound message queue.
//!
//! Every producer on a connection (responses, heartbeats) funnels serialized
//! lines into one unbounded channel. A single consumer owns the sink, which
//! keeps NDJSON lines intact and lets writers stay non-blocking.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbound {
    /// Create a queue and the receiver its consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Serialize and enqueue one message. Returns `false` when the consumer
    /// is gone; callers log and move on.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize outbound message");
                return false;
            }
        };
        self.tx.send(line).is_ok()
    }

    /// True while the consumer still accepts messages.
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Resolves once the consumer has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Drain `rx` into `writer`, one line per message.
///
/// On a write error the receiver is closed, which flips every
/// [`Outbound::is_writable`] to `false`.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    peer: String,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            trace!(peer = %peer, line = %line, "Writing message");
            let result = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
            .await;

            if let Err(e) = result {
                warn!(peer = %peer, error = %e, "Transport not writable, dropping outbound queue");
                rx.close();
                break;
            }
        }
        let _ = writer.shutdown().await;
        debug!(peer = %peer, "Writer finished");
    })
}
