//! Ads MCP Server - Main entry point.
//!
//! Serves the advertising campaign tools over stdio, raw TCP or SSE.

use ads_mcp_server::auth::AuthConfig;
use ads_mcp_server::config::{Config, TransportMode};
use ads_mcp_server::db::{DbPool, QueryExecutor, ensure_schema};
use ads_mcp_server::mcp::build_dispatcher;
use ads_mcp_server::rpc::ServerContext;
use ads_mcp_server::tools::AdsTools;
use ads_mcp_server::transport::sse::SsePaths;
use ads_mcp_server::transport::{SseTransport, StdioTransport, TcpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs always go to stderr; stdout is
/// reserved for protocol traffic and the startup line.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic| {
        error!(panic = %panic, "Task panicked");
    }));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);
    install_panic_hook();

    info!(
        transport = %config.transport,
        "Starting Ads MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db_config = config.database()?;
    let pool = Arc::new(DbPool::connect(&db_config).await?);
    if config.init_schema {
        ensure_schema(&pool).await?;
    }

    let tools = AdsTools::new(
        pool.clone(),
        QueryExecutor::within_deadline(config.request_timeout_duration()),
    );
    let ctx = ServerContext::new(build_dispatcher(tools), config.connection_settings());

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(ctx, pool).run().await,
        TransportMode::Tcp => {
            info!(
                host = %config.host,
                port = config.base_port(),
                heartbeat_secs = config.heartbeat_interval,
                "Using TCP transport"
            );
            TcpTransport::new(
                ctx,
                pool,
                &config.host,
                config.base_port(),
                config.port_attempts,
            )
            .run()
            .await
        }
        TransportMode::Sse => {
            info!(host = %config.host, port = config.base_port(), "Using SSE transport");
            let paths = SsePaths {
                sse_path: config.sse_path.clone(),
                messages_path: config.messages_path.clone(),
            };
            SseTransport::new(
                ctx,
                pool,
                &config.host,
                config.base_port(),
                config.port_attempts,
                paths,
                AuthConfig::from_keys(config.api_keys.clone()),
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, fatal = e.is_fatal(), "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
