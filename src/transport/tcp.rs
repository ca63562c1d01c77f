//! Raw TCP transport.
//!
//! Each accepted socket becomes an independent connection task speaking
//! newline-delimited JSON-RPC, with TCP keep-alive enabled and periodic
//! heartbeats as configured in the server context.

use crate::db::DbPool;
use crate::error::AdsResult;
use crate::rpc::{ServerContext, serve};
use crate::transport::{Transport, announce_listening, bind_with_retry, wait_for_signal};
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

pub struct TcpTransport {
    ctx: Arc<ServerContext>,
    pool: Arc<DbPool>,
    host: String,
    base_port: u16,
    port_attempts: u16,
}

impl TcpTransport {
    pub fn new(
        ctx: Arc<ServerContext>,
        pool: Arc<DbPool>,
        host: impl Into<String>,
        base_port: u16,
        port_attempts: u16,
    ) -> Self {
        Self {
            ctx,
            pool,
            host: host.into(),
            base_port,
            port_attempts,
        }
    }
}

impl Transport for TcpTransport {
    async fn run(&self) -> AdsResult<()> {
        let (listener, port) =
            bind_with_retry(&self.host, self.base_port, self.port_attempts).await?;
        announce_listening(self.name(), &self.host, port)?;

        tokio::select! {
            _ = accept_loop(self.ctx.clone(), listener) => {}
            _ = wait_for_signal() => info!("Shutdown signal received"),
        }

        info!("Closing database connections");
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Accept sockets forever, spawning one connection task per socket.
pub async fn accept_loop(ctx: Arc<ServerContext>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                configure_socket(&stream);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    serve(ctx, addr.to_string(), reader, writer).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

fn configure_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        warn!(error = %e, "Failed to enable TCP keep-alive");
    }
}
