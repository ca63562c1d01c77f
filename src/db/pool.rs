//! Connection pool.
//!
//! Database-specific pools (PgPool, SqlitePool) rather than `AnyPool`, so row
//! decoding keeps full type information.

use crate::config::{DatabaseConfig, DatabaseKind};
use crate::error::{AdsError, AdsResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for `config`. Fails when the first connection cannot be
    /// established.
    pub async fn connect(config: &DatabaseConfig) -> AdsResult<Self> {
        let opts = &config.pool_options;
        let is_sqlite = config.kind == DatabaseKind::Sqlite;
        let max_connections = opts.max_connections_or_default(is_sqlite);
        let acquire_timeout = opts.acquire_timeout_or_default();

        let pool = match config.kind {
            DatabaseKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.connection_string)
                    .await
                    .map_err(|e| AdsError::connection(format!("Failed to connect: {}", e)))?;
                DbPool::Postgres(pool)
            }
            DatabaseKind::Sqlite => {
                let options = SqliteConnectOptions::from_str(&config.connection_string)
                    .map_err(|e| {
                        AdsError::connection(format!("Invalid SQLite connection string: {}", e))
                    })?
                    .foreign_keys(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(|e| AdsError::connection(format!("Failed to connect: {}", e)))?;
                DbPool::SQLite(pool)
            }
        };

        info!(
            kind = %config.kind,
            max_connections,
            version = pool.server_version().await.as_deref().unwrap_or("unknown"),
            "Database pool ready"
        );
        Ok(pool)
    }

    pub fn kind(&self) -> DatabaseKind {
        match self {
            DbPool::Postgres(_) => DatabaseKind::Postgres,
            DbPool::SQLite(_) => DatabaseKind::Sqlite,
        }
    }

    /// Placeholder for the `n`th (1-based) bind parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            DbPool::Postgres(_) => format!("${n}"),
            DbPool::SQLite(_) => format!("?{n}"),
        }
    }

    pub async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    async fn server_version(&self) -> Option<String> {
        let result = match self {
            DbPool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SHOW server_version")
                    .fetch_one(pool)
                    .await
            }
            DbPool::SQLite(pool) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(pool)
                    .await
            }
        };
        match result {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "Failed to read server version");
                None
            }
        }
    }
}
