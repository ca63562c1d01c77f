//! User management tools.

use crate::db::{DbPool, JsonRow, QueryExecutor, QueryParam};
use crate::error::{AdsError, AdsResult};
use crate::models::User;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateUserInput {
    /// Unique user name
    pub username: String,
    /// Password, stored as given
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetUserInput {
    /// Numeric user id
    pub id: i64,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListUsersInput {}

#[derive(Clone)]
pub struct UserToolHandler {
    pool: Arc<DbPool>,
    executor: QueryExecutor,
}

impl UserToolHandler {
    pub fn new(pool: Arc<DbPool>, executor: QueryExecutor) -> Self {
        Self { pool, executor }
    }

    pub async fn create_user(&self, input: CreateUserInput) -> AdsResult<User> {
        let sql = format!(
            "INSERT INTO users (username, password) VALUES ({}, {}) \
             RETURNING CAST(id AS BIGINT) AS id, username",
            self.pool.placeholder(1),
            self.pool.placeholder(2)
        );
        let params = [
            QueryParam::from(input.username.as_str()),
            input.password.as_str().into(),
        ];
        let row = self
            .executor
            .fetch_optional(&self.pool, &sql, &params)
            .await?
            .ok_or_else(|| AdsError::internal("INSERT returned no row"))?;
        let user = decode_user(row)?;
        info!(user_id = user.id, "Created user");
        Ok(user)
    }

    pub async fn get_user(&self, input: GetUserInput) -> AdsResult<User> {
        let sql = format!(
            "SELECT CAST(id AS BIGINT) AS id, username FROM users WHERE id = {}",
            self.pool.placeholder(1)
        );
        self.executor
            .fetch_optional(&self.pool, &sql, &[QueryParam::Int(input.id)])
            .await?
            .map(decode_user)
            .transpose()?
            .ok_or_else(|| AdsError::not_found("User", input.id))
    }

    pub async fn list_users(&self, _input: ListUsersInput) -> AdsResult<Vec<User>> {
        let rows = self
            .executor
            .fetch_all(
                &self.pool,
                "SELECT CAST(id AS BIGINT) AS id, username FROM users ORDER BY id",
                &[],
            )
            .await?;
        rows.into_iter().map(decode_user).collect()
    }
}

fn decode_user(row: JsonRow) -> AdsResult<User> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| AdsError::internal(format!("Unexpected user row: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::ensure_schema;

    async fn handler() -> UserToolHandler {
        let config = DatabaseConfig::parse("sqlite::memory:").unwrap();
        let pool = DbPool::connect(&config).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        UserToolHandler::new(Arc::new(pool), QueryExecutor::default())
    }

    fn create(username: &str) -> CreateUserInput {
        CreateUserInput {
            username: username.into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let handler = handler().await;
        let alice = handler.create_user(create("alice")).await.unwrap();
        let bob = handler.create_user(create("bob")).await.unwrap();
        assert_eq!(alice.username, "alice");
        assert!(bob.id > alice.id);

        let fetched = handler.get_user(GetUserInput { id: bob.id }).await.unwrap();
        assert_eq!(fetched, bob);

        let all = handler.list_users(ListUsersInput::default()).await.unwrap();
        assert_eq!(all, vec![alice, bob]);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let handler = handler().await;
        let err = handler.get_user(GetUserInput { id: 42 }).await.unwrap_err();
        assert_eq!(err.to_string(), "User not found: 42");
    }

    #[tokio::test]
    async fn test_duplicate_username_is_database_error() {
        let handler = handler().await;
        handler.create_user(create("carol")).await.unwrap();
        let err = handler.create_user(create("carol")).await.unwrap_err();
        assert!(matches!(err, AdsError::Database { .. }));
    }

    #[test]
    fn test_user_json_has_no_password() {
        let user = User {
            id: 1,
            username: "dave".into(),
        };
        let value = serde_json::to_value(user).unwrap();
        assert!(value.get("password").is_none());
    }
}
