//! Shared fixtures: a seeded SQLite database in a temp file and a server
//! context built on it.

#![allow(dead_code)]

use ads_mcp_server::config::DatabaseConfig;
use ads_mcp_server::db::{DbPool, QueryExecutor, ensure_schema};
use ads_mcp_server::mcp::build_dispatcher;
use ads_mcp_server::rpc::{ConnectionSettings, ServerContext};
use ads_mcp_server::tools::AdsTools;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDb {
    pub pool: Arc<DbPool>,
    // Keeps the database file alive for the test's duration.
    _dir: TempDir,
}

const SEED: &[&str] = &[
    "INSERT INTO advertising_profiles (profile_id, country_code, marketplace_id) VALUES
        ('p1', 'US', 'ATVPDKIKX0DER'),
        ('p2', 'DE', 'A1PA6795UKMFR9')",
    "INSERT INTO campaigns (profile_id, campaign_id, name, state, budget, start_date) VALUES
        ('p1', 'c1', 'Spring Sale', 'enabled', 100.0, '2024-01-01'),
        ('p1', 'c2', 'Brand Defense', 'enabled', 50.0, NULL),
        ('p1', 'c3', 'Clearance', 'paused', 20.0, NULL),
        ('p1', 'c4', 'New Launch', 'enabled', 75.0, NULL),
        ('p2', 'c5', 'Other Profile', 'enabled', 10.0, NULL)",
    "INSERT INTO ad_groups (campaign_id, ad_group_id, name, state, default_bid) VALUES
        ('c1', 'g1', 'Shoes', 'enabled', 0.75),
        ('c2', 'g2', 'Empty Group', 'enabled', NULL)",
    "INSERT INTO metrics (profile_id, campaign_id, ad_group_id, date, impressions, clicks, spend, sales, acos, roas) VALUES
        ('p1', 'c1', 'g1', '2024-01-01', 1000, 50, 20.0, 60.0, 0.33, 3.0),
        ('p1', 'c1', 'g1', '2024-01-02', 1500, 70, 30.0, 75.0, 0.4, 2.5),
        ('p1', 'c1', 'g1', '2024-01-03', 500, 10, 10.0, 5.0, 2.0, 0.5),
        ('p1', 'c2', NULL, '2024-01-02', 400, 8, 10.0, 15.0, 0.67, 1.5),
        ('p1', 'c3', NULL, '2024-01-02', 300, 3, 10.0, 5.0, 2.0, 0.5),
        ('p2', 'c5', NULL, '2024-01-02', 999, 99, 9.0, 9.0, 1.0, 1.0)",
];

impl TestDb {
    /// Fresh database with the campaign schema, optionally seeded.
    pub async fn new(seed: bool) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ads.db").display());
        let config = DatabaseConfig::parse(&url).expect("database url");
        let pool = DbPool::connect(&config).await.expect("connect");
        ensure_schema(&pool).await.expect("schema");

        if seed {
            if let DbPool::SQLite(sqlite) = &pool {
                for statement in SEED {
                    sqlx::query(statement).execute(sqlite).await.expect("seed");
                }
            }
        }

        Self {
            pool: Arc::new(pool),
            _dir: dir,
        }
    }

    pub fn tools(&self) -> AdsTools {
        AdsTools::new(self.pool.clone(), QueryExecutor::default())
    }

    pub fn context(&self, settings: ConnectionSettings) -> Arc<ServerContext> {
        ServerContext::new(build_dispatcher(self.tools()), settings)
    }
}
