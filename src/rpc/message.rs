//! JSON-RPC 2.0 envelopes.
//!
//! Inbound lines are parsed into [`Incoming`]; outbound traffic is either a
//! [`Response`] (correlated with a request id) or an [`OutboundNotification`].
//!
//! See: https://www.jsonrpc.org/specification

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Value of the `jsonrpc` member on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard and server-defined JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    /// A handler failed (returned an error or panicked).
    pub const EXECUTION_ERROR: i32 = -32000;
    /// A handler did not settle before its deadline.
    pub const TIMEOUT: i32 = -32001;
}

/// Request identifier. Scoped to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a `data` member.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(codes::EXECUTION_ERROR, message)
    }

    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "Request timed out")
    }
}

/// Why an inbound line could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("missing or unsupported jsonrpc version (expected \"2.0\")")]
    Version,

    #[error("id must be a string, an integer or null")]
    MalformedId,

    #[error("envelope has neither a string method nor a result/error member")]
    MissingMethod,

    #[error("line is not valid UTF-8")]
    Utf8,

    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
}

/// Request expecting exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

/// Request without an id; never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(Request),
    Notification(Notification),
    /// A response sent by the peer. The server never issues requests, so these
    /// are only logged.
    Response(Value),
}

/// Parse one line into an envelope.
///
/// ```
/// use ads_mcp_server::rpc::message::{parse_line, Incoming, RequestId};
///
/// let msg = parse_line(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
/// match msg {
///     Incoming::Request(req) => {
///         assert_eq!(req.id, RequestId::Number(7));
///         assert_eq!(req.method, "tools/list");
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn parse_line(line: &str) -> Result<Incoming, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(mut object) = value else {
        return Err(ParseError::NotAnObject);
    };

    match object.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err(ParseError::Version),
    }

    let id = parse_id(object.get("id"))?;

    match object.remove("method") {
        Some(Value::String(method)) => {
            let params = object.remove("params").unwrap_or(Value::Null);
            Ok(match id {
                Some(id) => Incoming::Request(Request { id, method, params }),
                None => Incoming::Notification(Notification { method, params }),
            })
        }
        Some(_) => Err(ParseError::MissingMethod),
        None if object.contains_key("result") || object.contains_key("error") => {
            Ok(Incoming::Response(Value::Object(object)))
        }
        None => Err(ParseError::MissingMethod),
    }
}

fn parse_id(raw: Option<&Value>) -> Result<Option<RequestId>, ParseError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(RequestId::String(s.clone()))),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or(ParseError::MalformedId),
        Some(_) => Err(ParseError::MalformedId),
    }
}

/// Body of a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcError),
}

/// Outbound response. `id` is serialized as `null` when unknown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Build a response from a handler outcome.
    pub fn from_result(id: RequestId, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::error(Some(id), error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

/// Server-initiated notification (no id, never answered).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutboundNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Borrow `params` as an object, treating `null` as empty.
pub fn params_object(params: &Value) -> Result<Map<String, Value>, RpcError> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        _ => Err(RpcError::invalid_params("params must be an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_with_string_id() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":"abc","method":"initialize","params":{}}"#)
            .unwrap();
        assert_eq!(
            msg,
            Incoming::Request(Request {
                id: RequestId::String("abc".to_string()),
                method: "initialize".to_string(),
                params: json!({}),
            })
        );
    }

    #[test]
    fn test_parse_notification_without_id() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, Incoming::Notification(n) if n.method == "notifications/initialized"));
    }

    #[test]
    fn test_parse_null_id_is_notification() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert!(matches!(msg, Incoming::Notification(_)));
    }

    #[test]
    fn test_parse_response_from_peer() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(msg, Incoming::Response(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(parse_line("{not json"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(parse_line("[1,2]"), Err(ParseError::NotAnObject)));
    }

    #[test]
    fn test_parse_rejects_missing_version() {
        assert!(matches!(
            parse_line(r#"{"id":1,"method":"ping"}"#),
            Err(ParseError::Version)
        ));
        assert!(matches!(
            parse_line(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#),
            Err(ParseError::Version)
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for raw in [
            r#"{"jsonrpc":"2.0","id":true,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":{"a":1},"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#,
        ] {
            assert!(
                matches!(parse_line(raw), Err(ParseError::MalformedId)),
                "{raw}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_non_string_method() {
        assert!(matches!(
            parse_line(r#"{"jsonrpc":"2.0","id":1,"method":42}"#),
            Err(ParseError::MissingMethod)
        ));
        assert!(matches!(
            parse_line(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(ParseError::MissingMethod)
        ));
    }

    #[test]
    fn test_success_response_shape() {
        let response = Response::success(RequestId::Number(3), json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}})
        );
    }

    #[test]
    fn test_parse_error_response_has_null_id() {
        let response = Response::error(None, RpcError::parse_error("bad"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(value["error"]["message"], "Parse error");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_method_not_found_names_method() {
        let err = RpcError::method_not_found("foo/bar");
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
        assert!(err.message.contains("foo/bar"));
    }

    #[test]
    fn test_notification_omits_id() {
        let n = OutboundNotification::new("notifications/heartbeat", None);
        let value = serde_json::to_value(&n).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_params_object_accepts_null() {
        assert!(params_object(&Value::Null).unwrap().is_empty());
        assert!(params_object(&json!([1])).is_err());
    }
}
