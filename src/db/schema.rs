//! Schema introspection and bootstrap.
//!
//! `SchemaInspector` backs the `schema://tables` resource. `ensure_schema`
//! creates the campaign tables when they are missing, which is how local
//! SQLite databases and tests get their layout.

use crate::db::pool::DbPool;
use crate::error::AdsResult;
use serde::Serialize;
use sqlx::Row;
use tracing::{debug, info};

/// One column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

mod queries {
    pub const POSTGRES_COLUMNS: &str = r#"
        SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
        FROM information_schema.columns
        WHERE table_schema = 'public'
        ORDER BY table_name, ordinal_position
    "#;

    pub const SQLITE_TABLES: &str = r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        ORDER BY name
    "#;

    pub const POSTGRES_DDL: &[&str] = &[
        r#"CREATE TABLE IF NOT EXISTS advertising_profiles (
            id SERIAL PRIMARY KEY,
            profile_id TEXT NOT NULL UNIQUE,
            country_code TEXT NOT NULL,
            marketplace_id TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT now(),
            updated_at TIMESTAMP DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS campaigns (
            id SERIAL PRIMARY KEY,
            profile_id TEXT REFERENCES advertising_profiles(profile_id),
            campaign_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            budget NUMERIC NOT NULL,
            start_date TIMESTAMP,
            end_date TIMESTAMP,
            created_at TIMESTAMP DEFAULT now(),
            updated_at TIMESTAMP DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS ad_groups (
            id SERIAL PRIMARY KEY,
            campaign_id TEXT REFERENCES campaigns(campaign_id),
            ad_group_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            default_bid NUMERIC,
            created_at TIMESTAMP DEFAULT now(),
            updated_at TIMESTAMP DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS metrics (
            id SERIAL PRIMARY KEY,
            profile_id TEXT REFERENCES advertising_profiles(profile_id),
            campaign_id TEXT REFERENCES campaigns(campaign_id),
            ad_group_id TEXT REFERENCES ad_groups(ad_group_id),
            date TIMESTAMP NOT NULL,
            impressions INTEGER NOT NULL,
            clicks INTEGER NOT NULL,
            spend NUMERIC NOT NULL,
            sales NUMERIC NOT NULL,
            acos NUMERIC,
            roas NUMERIC,
            created_at TIMESTAMP DEFAULT now()
        )"#,
        r#"CREATE TABLE IF NOT EXISTS users (
            id SERIAL PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL
        )"#,
    ];

    pub const SQLITE_DDL: &[&str] = &[
        r#"CREATE TABLE IF NOT EXISTS advertising_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id TEXT NOT NULL UNIQUE,
            country_code TEXT NOT NULL,
            marketplace_id TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id TEXT REFERENCES advertising_profiles(profile_id),
            campaign_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            budget REAL NOT NULL,
            start_date TEXT,
            end_date TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS ad_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id TEXT REFERENCES campaigns(campaign_id),
            ad_group_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            state TEXT NOT NULL,
            default_bid REAL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            profile_id TEXT REFERENCES advertising_profiles(profile_id),
            campaign_id TEXT REFERENCES campaigns(campaign_id),
            ad_group_id TEXT REFERENCES ad_groups(ad_group_id),
            date TEXT NOT NULL,
            impressions INTEGER NOT NULL,
            clicks INTEGER NOT NULL,
            spend REAL NOT NULL,
            sales REAL NOT NULL,
            acos REAL,
            roas REAL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL
        )"#,
    ];
}

pub struct SchemaInspector;

impl SchemaInspector {
    /// All user table columns, ordered by table then position.
    pub async fn list_columns(pool: &DbPool) -> AdsResult<Vec<ColumnInfo>> {
        match pool {
            DbPool::Postgres(p) => postgres::list_columns(p).await,
            DbPool::SQLite(p) => sqlite::list_columns(p).await,
        }
    }

    /// Render columns as a plain-text table listing:
    ///
    /// ```text
    /// Table: users
    ///   id integer NOT NULL
    ///   username text NOT NULL
    /// ```
    pub fn render(columns: &[ColumnInfo]) -> String {
        let mut blocks: Vec<String> = Vec::new();
        let mut current: Option<&str> = None;
        for column in columns {
            if current != Some(column.table.as_str()) {
                blocks.push(format!("Table: {}", column.table));
                current = Some(column.table.as_str());
            }
            if let Some(block) = blocks.last_mut() {
                block.push_str(&format!(
                    "\n  {} {}{}",
                    column.name,
                    column.data_type,
                    if column.nullable { " NULL" } else { " NOT NULL" }
                ));
            }
        }
        blocks.join("\n\n")
    }
}

/// Create the campaign tables if they do not exist.
pub async fn ensure_schema(pool: &DbPool) -> AdsResult<()> {
    match pool {
        DbPool::Postgres(p) => {
            for ddl in queries::POSTGRES_DDL {
                sqlx::query(ddl).execute(p).await?;
            }
        }
        DbPool::SQLite(p) => {
            for ddl in queries::SQLITE_DDL {
                sqlx::query(ddl).execute(p).await?;
            }
        }
    }
    info!(kind = %pool.kind(), "Schema ready");
    Ok(())
}

mod postgres {
    use super::*;
    use sqlx::PgPool;

    pub async fn list_columns(pool: &PgPool) -> AdsResult<Vec<ColumnInfo>> {
        let rows = sqlx::query(queries::POSTGRES_COLUMNS)
            .fetch_all(pool)
            .await?;
        rows.iter()
            .map(|row| -> AdsResult<ColumnInfo> {
                Ok(ColumnInfo {
                    table: row.try_get(0)?,
                    name: row.try_get(1)?,
                    data_type: row.try_get(2)?,
                    nullable: row.try_get::<String, _>(3)? == "YES",
                })
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;

    pub async fn list_columns(pool: &SqlitePool) -> AdsResult<Vec<ColumnInfo>> {
        let tables: Vec<String> = sqlx::query_scalar(queries::SQLITE_TABLES)
            .fetch_all(pool)
            .await?;

        let mut columns = Vec::new();
        for table in tables {
            debug!(table = %table, "Reading table info");
            let pragma = format!("PRAGMA table_info('{}')", table.replace('\'', "''"));
            for row in sqlx::query(&pragma).fetch_all(pool).await? {
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                columns.push(ColumnInfo {
                    table: table.clone(),
                    name: row.try_get("name")?,
                    data_type: row.try_get::<String, _>("type")?.to_lowercase(),
                    nullable: not_null == 0 && pk == 0,
                });
            }
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    #[test]
    fn test_render_groups_by_table() {
        let column = |table: &str, name: &str, nullable| ColumnInfo {
            table: table.into(),
            name: name.into(),
            data_type: "text".into(),
            nullable,
        };
        let text = SchemaInspector::render(&[
            column("a", "x", false),
            column("a", "y", true),
            column("b", "z", false),
        ]);
        assert_eq!(
            text,
            "Table: a\n  x text NOT NULL\n  y text NULL\n\nTable: b\n  z text NOT NULL"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(SchemaInspector::render(&[]), "");
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let config = DatabaseConfig::parse("sqlite::memory:").unwrap();
        let pool = DbPool::connect(&config).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();

        let columns = SchemaInspector::list_columns(&pool).await.unwrap();
        let users: Vec<_> = columns.iter().filter(|c| c.table == "users").collect();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].name, "id");
        assert!(!users[0].nullable);
        assert!(columns.iter().any(|c| c.table == "metrics" && c.name == "roas" && c.nullable));
    }
}
