//! The `query` tool: run caller-supplied SQL behind the statement policy.

use crate::db::{DbPool, QueryExecutor, QueryOutput, QueryParam};
use crate::error::AdsResult;
use crate::tools::guard::{self, StatementKind};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Input for the query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// SQL statement to execute. DROP, TRUNCATE and ALTER statements are rejected.
    pub sql: String,
    /// Positional parameters for $1, $2... (PostgreSQL) or ?1, ?2... (SQLite) placeholders
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

#[derive(Clone)]
pub struct QueryToolHandler {
    pool: Arc<DbPool>,
    executor: QueryExecutor,
}

impl QueryToolHandler {
    pub fn new(pool: Arc<DbPool>, executor: QueryExecutor) -> Self {
        Self { pool, executor }
    }

    /// Row-producing statements return their rows; anything else returns
    /// the affected row count.
    pub async fn query(&self, input: QueryInput) -> AdsResult<QueryOutput> {
        let kind = guard::check_statement(&input.sql, self.pool.kind())?;
        let params: Vec<QueryParam> = input
            .params
            .unwrap_or_default()
            .iter()
            .map(QueryParam::from)
            .collect();

        info!(kind = ?kind, params = params.len(), "Running query tool");
        self.executor
            .execute(&self.pool, &input.sql, &params, kind == StatementKind::Query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::error::AdsError;
    use serde_json::json;

    async fn handler() -> QueryToolHandler {
        let config = DatabaseConfig::parse("sqlite::memory:").unwrap();
        let pool = DbPool::connect(&config).await.unwrap();
        QueryToolHandler::new(Arc::new(pool), QueryExecutor::default())
    }

    fn input(value: Value) -> QueryInput {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_write_and_select_with_params() {
        let handler = handler().await;
        handler
            .query(input(json!({"sql": "CREATE TABLE t (id INTEGER, label TEXT)"})))
            .await
            .unwrap();
        let inserted = handler
            .query(input(json!({
                "sql": "INSERT INTO t VALUES (?1, ?2)",
                "params": [7, "seven"]
            })))
            .await
            .unwrap();
        assert_eq!(inserted, QueryOutput::Affected { rows_affected: 1 });

        let selected = handler
            .query(input(json!({"sql": "SELECT label FROM t WHERE id = ?1", "params": [7]})))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(selected).unwrap(),
            json!([{"label": "seven"}])
        );
    }

    #[tokio::test]
    async fn test_drop_is_blocked_before_execution() {
        let handler = handler().await;
        handler
            .query(input(json!({"sql": "CREATE TABLE keep_me (id INTEGER)"})))
            .await
            .unwrap();

        let err = handler
            .query(input(json!({"sql": "drop table keep_me"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AdsError::Blocked { ref operation } if operation == "DROP"));

        let still_there = handler
            .query(input(json!({"sql": "SELECT COUNT(*) AS n FROM keep_me"})))
            .await
            .unwrap();
        assert_eq!(serde_json::to_value(still_there).unwrap(), json!([{"n": 0}]));
    }

    #[test]
    fn test_params_are_optional() {
        let parsed = input(json!({"sql": "SELECT 1"}));
        assert!(parsed.params.is_none());
    }
}
