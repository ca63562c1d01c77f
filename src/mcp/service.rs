//! MCP method table.
//!
//! Registers the MCP methods on a [`Dispatcher`]: `initialize`, `ping`,
//! `tools/list`, `tools/call`, `resources/list`, `resources/read` and the
//! `notifications/initialized` no-op. Tool and resource calls touch the
//! database, so they are registered async and run under the request
//! tracker's deadline.

use crate::db::SchemaInspector;
use crate::error::{AdsError, AdsResult};
use crate::rpc::{Dispatcher, RpcError, message::params_object};
use crate::tools::AdsTools;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "Amazon-Ads-MCP";
pub const SERVER_VENDOR: &str = "Custom";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// MCP protocol revision answered to `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SCHEMA_RESOURCE_URI: &str = "schema://tables";
const SCHEMA_RESOURCE_NAME: &str = "schema";

/// Build the immutable dispatcher shared by every connection.
pub fn build_dispatcher(tools: AdsTools) -> Dispatcher {
    let tool_names = tools.catalog().names();
    let tool_list = json!({ "tools": tools.catalog().definitions() });
    let call_tools = tools.clone();
    let read_tools = tools;

    Dispatcher::builder()
        .register("initialize", move |params| Ok(initialize(&params, &tool_names)))
        .register("ping", |_| Ok(json!({})))
        .register("notifications/initialized", |_| {
            debug!("Client finished initialization");
            Ok(Value::Null)
        })
        .register("tools/list", move |_| Ok(tool_list.clone()))
        .register("resources/list", |_| Ok(resource_list()))
        .register_async("tools/call", move |params| {
            let tools = call_tools.clone();
            async move { call_tool(&tools, params).await }
        })
        .register_async("resources/read", move |params| {
            let tools = read_tools.clone();
            async move { read_resource(&tools, params).await }
        })
        .build()
}

fn initialize(params: &Value, tool_names: &[&str]) -> Value {
    let client = params.get("clientInfo").cloned().unwrap_or(Value::Null);
    let protocol = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    info!(client = %client, protocol = %protocol, "Client initializing");
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
            "vendor": SERVER_VENDOR,
        },
        "capabilities": {
            "resources": [SCHEMA_RESOURCE_NAME],
            "tools": tool_names,
        }
    })
}

fn resource_list() -> Value {
    json!({
        "resources": [{
            "uri": SCHEMA_RESOURCE_URI,
            "name": SCHEMA_RESOURCE_NAME,
            "mimeType": "text/plain",
        }]
    })
}

async fn call_tool(tools: &AdsTools, params: Value) -> Result<Value, RpcError> {
    let params = params_object(&params)?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("tools/call requires a string \"name\""))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    tools.call(name, arguments).await.map_err(|e| {
        warn!(tool = %name, error = %e, "Tool call failed");
        RpcError::from(e)
    })
}

async fn read_resource(tools: &AdsTools, params: Value) -> Result<Value, RpcError> {
    let params = params_object(&params)?;
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("resources/read requires a string \"uri\""))?;

    render_resource(tools, uri).await.map_err(RpcError::from)
}

async fn render_resource(tools: &AdsTools, uri: &str) -> AdsResult<Value> {
    if uri != SCHEMA_RESOURCE_URI {
        return Err(AdsError::not_found("Resource", uri));
    }
    let columns = SchemaInspector::list_columns(tools.pool()).await?;
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "text/plain",
            "text": SchemaInspector::render(&columns),
        }]
    }))
}
