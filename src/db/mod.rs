//! Database access layer.
//!
//! - Connection pool (PostgreSQL or SQLite)
//! - Query execution and parameter binding
//! - Row to JSON conversion
//! - Schema introspection and bootstrap

pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use executor::{JsonRow, QueryExecutor, QueryOutput};
pub use params::QueryParam;
pub use pool::DbPool;
pub use schema::{ColumnInfo, SchemaInspector, ensure_schema};
