//! Query execution.
//!
//! Row-producing statements on PostgreSQL are wrapped in `row_to_json`, so
//! any column type (NUMERIC, TIMESTAMP, arrays) reaches the client in the
//! server's own JSON rendering. SQLite rows go through [`RowToJson`].

use crate::db::params::{QueryParam, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::DbPool;
use crate::db::types::RowToJson;
use crate::error::{AdsError, AdsResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Matches [`QueryExecutor::within_deadline`] for the default 25 s request
/// deadline.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Time left for serializing and writing the response once a query ends.
const RESPONSE_MARGIN: Duration = Duration::from_secs(5);

pub type JsonRow = Map<String, Value>;

/// Result of a statement run through [`QueryExecutor::execute`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Rows(Vec<JsonRow>),
    #[serde(rename_all = "camelCase")]
    Affected { rows_affected: u64 },
}

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// An executor whose queries give up before a request deadline of
    /// `request_timeout` expires, so the caller sees the query timeout
    /// rather than a bare request timeout.
    pub fn within_deadline(request_timeout: Duration) -> Self {
        Self::new(
            request_timeout
                .saturating_sub(RESPONSE_MARGIN)
                .max(request_timeout / 2),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run arbitrary SQL. `returns_rows` selects between fetching rows and
    /// reporting the affected row count.
    pub async fn execute(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
        returns_rows: bool,
    ) -> AdsResult<QueryOutput> {
        let start = Instant::now();
        debug!(sql = %sql, params = params.len(), returns_rows, "Executing statement");

        let output = if returns_rows {
            let rows = match pool {
                DbPool::Postgres(p) => {
                    let wrapped = format!(
                        "SELECT row_to_json(q)::text FROM ({}) q",
                        strip_terminator(sql)
                    );
                    self.with_timeout("query execution", postgres::fetch_json(p, &wrapped, params))
                        .await?
                }
                DbPool::SQLite(_) => self.fetch_all(pool, sql, params).await?,
            };
            QueryOutput::Rows(rows)
        } else {
            let rows_affected = match pool {
                DbPool::Postgres(p) => {
                    self.with_timeout("write operation", postgres::execute(p, sql, params))
                        .await?
                }
                DbPool::SQLite(p) => {
                    self.with_timeout("write operation", sqlite::execute(p, sql, params))
                        .await?
                }
            };
            QueryOutput::Affected { rows_affected }
        };

        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Statement finished");
        Ok(output)
    }

    /// Fetch rows of a statement whose column types the caller controls.
    pub async fn fetch_all(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> AdsResult<Vec<JsonRow>> {
        match pool {
            DbPool::Postgres(p) => {
                self.with_timeout("query execution", postgres::fetch_rows(p, sql, params))
                    .await
            }
            DbPool::SQLite(p) => {
                self.with_timeout("query execution", sqlite::fetch_rows(p, sql, params))
                    .await
            }
        }
    }

    pub async fn fetch_optional(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> AdsResult<Option<JsonRow>> {
        Ok(self.fetch_all(pool, sql, params).await?.into_iter().next())
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        work: impl Future<Output = AdsResult<T>>,
    ) -> AdsResult<T> {
        match timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(AdsError::timeout(operation, self.timeout.as_secs())),
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> AdsResult<Vec<JsonRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let rows = query.fetch_all(pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    /// Each row is a single `row_to_json(..)::text` column.
    pub async fn fetch_json(
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> AdsResult<Vec<JsonRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let rows = query.fetch_all(pool).await?;
        rows.iter()
            .map(|row| match serde_json::from_str::<Value>(&row.try_get::<String, _>(0)?) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(AdsError::internal("row_to_json returned a non-object")),
                Err(e) => Err(AdsError::internal(format!("Invalid row JSON: {}", e))),
            })
            .collect()
    }

    pub async fn execute(pool: &PgPool, sql: &str, params: &[QueryParam]) -> AdsResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;

    pub async fn fetch_rows(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> AdsResult<Vec<JsonRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        let rows = query.fetch_all(pool).await?;
        Ok(rows.iter().map(RowToJson::to_json_map).collect())
    }

    pub async fn execute(pool: &SqlitePool, sql: &str, params: &[QueryParam]) -> AdsResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_sqlite_param(query, param);
        }
        Ok(query.execute(pool).await?.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use serde_json::json;

    async fn memory_pool() -> DbPool {
        let config = DatabaseConfig::parse("sqlite::memory:").unwrap();
        DbPool::connect(&config).await.unwrap()
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("SELECT 1;  \n"), "SELECT 1");
        assert_eq!(strip_terminator("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_output_serialization() {
        let affected = QueryOutput::Affected { rows_affected: 3 };
        assert_eq!(serde_json::to_value(&affected).unwrap(), json!({"rowsAffected": 3}));
        let rows = QueryOutput::Rows(vec![]);
        assert_eq!(serde_json::to_value(&rows).unwrap(), json!([]));
    }

    #[test]
    fn test_query_timeout_fires_before_request_deadline() {
        use crate::rpc::tracker::DEFAULT_REQUEST_TIMEOUT;

        assert!(QueryExecutor::default().timeout() < DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            QueryExecutor::within_deadline(DEFAULT_REQUEST_TIMEOUT).timeout(),
            DEFAULT_QUERY_TIMEOUT
        );
        for secs in [1, 2, 5, 6, 3600] {
            let deadline = Duration::from_secs(secs);
            let query = QueryExecutor::within_deadline(deadline).timeout();
            assert!(query < deadline, "{secs}s deadline");
            assert!(query >= deadline / 2, "{secs}s deadline");
        }
    }

    #[tokio::test]
    async fn test_write_then_query() {
        let pool = memory_pool().await;
        let executor = QueryExecutor::default();

        executor
            .execute(&pool, "CREATE TABLE t (id INTEGER, name TEXT)", &[], false)
            .await
            .unwrap();
        let inserted = executor
            .execute(
                &pool,
                "INSERT INTO t VALUES (?1, ?2), (?3, ?4)",
                &[
                    QueryParam::Int(1),
                    "a".into(),
                    QueryParam::Int(2),
                    "b".into(),
                ],
                false,
            )
            .await
            .unwrap();
        assert_eq!(inserted, QueryOutput::Affected { rows_affected: 2 });

        let output = executor
            .execute(&pool, "SELECT * FROM t WHERE id = ?1", &[QueryParam::Int(2)], true)
            .await
            .unwrap();
        let QueryOutput::Rows(rows) = output else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "b");
    }

    #[tokio::test]
    async fn test_sql_error_is_database_error() {
        let pool = memory_pool().await;
        let err = QueryExecutor::default()
            .execute(&pool, "SELECT * FROM missing_table", &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, AdsError::Database { .. }));
    }
}
