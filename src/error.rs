//! Error types for the ads MCP server.
//!
//! Domain failures are [`AdsError`]. At the protocol boundary every variant
//! becomes a JSON-RPC execution error carrying the display message, so the
//! messages are written to be read by the calling assistant.

use crate::rpc::message::RpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdsError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Statement blocked: {operation} statements are not allowed")]
    Blocked { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No free port in {first}..={last} on {host}")]
    PortsExhausted { host: String, first: u16, last: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AdsError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    pub fn blocked(operation: impl Into<String>) -> Self {
        Self::Blocked {
            operation: operation.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Only startup failures end the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::PortsExhausted { .. })
    }
}

impl From<sqlx::Error> for AdsError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => AdsError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                AdsError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => AdsError::not_found("Row", "query returned no rows"),
            sqlx::Error::PoolTimedOut => AdsError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => AdsError::connection("Connection pool is closed"),
            sqlx::Error::Io(io_err) => AdsError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => AdsError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => AdsError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::ColumnNotFound(col) => {
                AdsError::database(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                AdsError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => AdsError::internal(format!("Decode error: {}", source)),
            _ => AdsError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

pub type AdsResult<T> = Result<T, AdsError>;

impl From<AdsError> for RpcError {
    fn from(err: AdsError) -> Self {
        match &err {
            AdsError::Database {
                message,
                sql_state: Some(code),
            } => RpcError::execution(format!("Database error: {} (SQLSTATE: {})", message, code)),
            _ => RpcError::execution(err.to_string()),
        }
    }
}
