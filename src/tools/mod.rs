//! MCP tool catalog and handlers.
//!
//! - `query`: run SQL behind the statement policy in [`guard`]
//! - `analyzeCampaignPerformance`, `analyzeAdGroupPerformance`,
//!   `optimizeBudget`, `analyzeTrends`: campaign analytics
//! - `createUser`, `getUser`, `listUsers`: user management
//!
//! [`ToolCatalog`] describes every tool with a JSON Schema derived from its
//! input type, and [`AdsTools::call`] decodes arguments into that same type,
//! so the advertised schema and the accepted arguments cannot drift apart.

pub mod campaign;
pub mod format;
pub mod guard;
pub mod query;
pub mod users;

pub use campaign::{
    AdGroupPerformanceInput, CampaignPerformanceInput, CampaignToolHandler, OptimizeBudgetInput,
    TrendsInput,
};
pub use format::text_content;
pub use query::{QueryInput, QueryToolHandler};
pub use users::{CreateUserInput, GetUserInput, ListUsersInput, UserToolHandler};

use crate::db::{DbPool, QueryExecutor};
use crate::error::{AdsError, AdsResult};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Tool names as advertised in `tools/list`.
pub mod names {
    pub const QUERY: &str = "query";
    pub const ANALYZE_CAMPAIGN_PERFORMANCE: &str = "analyzeCampaignPerformance";
    pub const ANALYZE_AD_GROUP_PERFORMANCE: &str = "analyzeAdGroupPerformance";
    pub const OPTIMIZE_BUDGET: &str = "optimizeBudget";
    pub const ANALYZE_TRENDS: &str = "analyzeTrends";
    pub const CREATE_USER: &str = "createUser";
    pub const GET_USER: &str = "getUser";
    pub const LIST_USERS: &str = "listUsers";
}

/// One `tools/list` entry. The argument schema is published both as
/// `parameters` and as MCP's `inputSchema`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub input_schema: Value,
}

impl ToolDefinition {
    fn new<T: JsonSchema>(name: &'static str, description: &'static str) -> Self {
        let schema = input_schema::<T>();
        Self {
            name,
            description,
            parameters: schema.clone(),
            input_schema: schema,
        }
    }
}

fn input_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
        map.entry("type").or_insert_with(|| Value::from("object"));
        map.entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    schema
}

/// The static tool catalog.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        use names::*;
        Self {
            tools: vec![
                ToolDefinition::new::<QueryInput>(
                    QUERY,
                    "Execute a SQL statement with optional positional parameters.\nSELECT returns rows as JSON; other statements return {rowsAffected}.\nDROP, TRUNCATE and ALTER statements are rejected.",
                ),
                ToolDefinition::new::<CampaignPerformanceInput>(
                    ANALYZE_CAMPAIGN_PERFORMANCE,
                    "Analyze a campaign: the campaign joined with its daily metrics, optionally limited to a date range.",
                ),
                ToolDefinition::new::<AdGroupPerformanceInput>(
                    ANALYZE_AD_GROUP_PERFORMANCE,
                    "Analyze an ad group: the ad group joined with its daily metrics, newest first.",
                ),
                ToolDefinition::new::<OptimizeBudgetInput>(
                    OPTIMIZE_BUDGET,
                    "Recommend budget changes for every campaign of a profile.\nROAS above 2: increase; below 1: decrease; otherwise maintain.",
                ),
                ToolDefinition::new::<TrendsInput>(
                    ANALYZE_TRENDS,
                    "Performance trends for a profile over a date range: totals and daily series for impressions, clicks and spend, and average ROAS.",
                ),
                ToolDefinition::new::<CreateUserInput>(CREATE_USER, "Create a user. Returns its id and username."),
                ToolDefinition::new::<GetUserInput>(GET_USER, "Fetch a user by numeric id."),
                ToolDefinition::new::<ListUsersInput>(LIST_USERS, "List all users (id and username)."),
            ],
        }
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes `tools/call` requests to the tool handlers.
#[derive(Clone)]
pub struct AdsTools {
    catalog: Arc<ToolCatalog>,
    pool: Arc<DbPool>,
    query: QueryToolHandler,
    campaigns: CampaignToolHandler,
    users: UserToolHandler,
}

impl AdsTools {
    pub fn new(pool: Arc<DbPool>, executor: QueryExecutor) -> Self {
        Self {
            catalog: Arc::new(ToolCatalog::new()),
            query: QueryToolHandler::new(pool.clone(), executor.clone()),
            campaigns: CampaignToolHandler::new(pool.clone(), executor.clone()),
            users: UserToolHandler::new(pool.clone(), executor),
            pool,
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pool
    }

    /// Run tool `name` and render its output as a text content block.
    pub async fn call(&self, name: &str, arguments: Value) -> AdsResult<Value> {
        use names::*;
        debug!(tool = %name, "Calling tool");
        match name {
            QUERY => text_content(&self.query.query(parse_arguments(name, arguments)?).await?),
            ANALYZE_CAMPAIGN_PERFORMANCE => text_content(
                &self
                    .campaigns
                    .analyze_campaign_performance(parse_arguments(name, arguments)?)
                    .await?,
            ),
            ANALYZE_AD_GROUP_PERFORMANCE => text_content(
                &self
                    .campaigns
                    .analyze_ad_group_performance(parse_arguments(name, arguments)?)
                    .await?,
            ),
            OPTIMIZE_BUDGET => text_content(
                &self
                    .campaigns
                    .optimize_budget(parse_arguments(name, arguments)?)
                    .await?,
            ),
            ANALYZE_TRENDS => text_content(
                &self
                    .campaigns
                    .analyze_trends(parse_arguments(name, arguments)?)
                    .await?,
            ),
            CREATE_USER => {
                text_content(&self.users.create_user(parse_arguments(name, arguments)?).await?)
            }
            GET_USER => text_content(&self.users.get_user(parse_arguments(name, arguments)?).await?),
            LIST_USERS => {
                text_content(&self.users.list_users(parse_arguments(name, arguments)?).await?)
            }
            _ => Err(AdsError::not_found("Tool", name)),
        }
    }
}

/// Decode tool arguments. Missing arguments are treated as `{}`.
fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> AdsResult<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| AdsError::invalid_input(format!("Invalid arguments for {}: {}", tool, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_entries_are_objects() {
        let catalog = ToolCatalog::new();
        assert_eq!(catalog.definitions().len(), 8);
        for tool in catalog.definitions() {
            assert!(!tool.name.is_empty());
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
            assert_eq!(tool.parameters, tool.input_schema);
        }
    }

    #[test]
    fn test_schema_uses_camel_case_fields() {
        let catalog = ToolCatalog::new();
        let trends = catalog.get(names::ANALYZE_TRENDS).unwrap();
        let properties = trends.parameters["properties"].as_object().unwrap();
        assert!(properties.contains_key("profileId"));
        assert!(properties.contains_key("dateRange"));
        let required = trends.parameters["required"].as_array().unwrap();
        assert!(required.contains(&json!("dateRange")));
    }

    #[test]
    fn test_definition_serializes_both_schema_keys() {
        let catalog = ToolCatalog::new();
        let value = serde_json::to_value(catalog.get(names::LIST_USERS).unwrap()).unwrap();
        assert_eq!(value["name"], "listUsers");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("parameters").is_some());
    }

    #[test]
    fn test_parse_arguments_null_is_empty_object() {
        let input: ListUsersInput = parse_arguments("listUsers", Value::Null).unwrap();
        let _ = input;
        let err = parse_arguments::<GetUserInput>("getUser", json!({"id": "x"})).unwrap_err();
        assert!(err.to_string().contains("Invalid arguments for getUser"));
    }
}
