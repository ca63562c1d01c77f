//! Stdio transport for the MCP server.
//!
//! One connection on stdin/stdout, the standard mode for CLI-based MCP
//! integrations. Logs go to stderr so stdout carries only protocol lines.

use crate::db::DbPool;
use crate::error::AdsResult;
use crate::rpc::{ServerContext, serve};
use crate::transport::{Transport, wait_for_signal};
use std::sync::Arc;
use tracing::{info, warn};

pub struct StdioTransport {
    ctx: Arc<ServerContext>,
    pool: Arc<DbPool>,
}

impl StdioTransport {
    pub fn new(ctx: Arc<ServerContext>, pool: Arc<DbPool>) -> Self {
        Self { ctx, pool }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> AdsResult<()> {
        info!("Starting MCP server with stdio transport");

        let session = serve(
            self.ctx.clone(),
            "stdio".to_string(),
            tokio::io::stdin(),
            tokio::io::stdout(),
        );

        let shutdown_requested = tokio::select! {
            _ = session => {
                info!("Stdin closed");
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing database connections");
        self.pool.close().await;

        if shutdown_requested {
            // tokio's stdin read runs on a blocking thread that select! cannot interrupt
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
