//! Integration tests for the SSE transport's HTTP surface.

mod common;

use ads_mcp_server::auth::AuthConfig;
use ads_mcp_server::rpc::ConnectionSettings;
use ads_mcp_server::transport::sse::{SessionRegistry, SsePaths, router};
use axum::Router;
use axum::body::{Body, BodyDataStream};
use axum::http::{Request, StatusCode, header};
use common::TestDb;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

fn paths() -> SsePaths {
    SsePaths {
        sse_path: "/mcp/sse".to_string(),
        messages_path: "/mcp/messages".to_string(),
    }
}

fn app(db: &TestDb, auth: AuthConfig, sessions: SessionRegistry) -> Router {
    router(db.context(ConnectionSettings::default()), &paths(), auth, sessions)
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, "Bearer test")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Read the next SSE event as (event name, data).
async fn next_event(stream: &mut BodyDataStream) -> (String, String) {
    let mut buffer = String::new();
    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("no event within 5s")
            .expect("stream ended")
            .unwrap();
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        if let Some(end) = buffer.find("\n\n") {
            let block = buffer[..end].to_string();
            let mut event = String::new();
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            if event.is_empty() && data.is_empty() {
                // keep-alive comment
                buffer.drain(..end + 2);
                continue;
            }
            return (event, data);
        }
    }
}

#[tokio::test]
async fn test_status_routes_are_public() {
    let db = TestDb::new(false).await;
    let app = app(&db, AuthConfig::default(), SessionRegistry::default());

    let response = app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["name"], "Amazon-Ads-MCP");
}

#[tokio::test]
async fn test_mcp_routes_require_bearer() {
    let db = TestDb::new(false).await;
    let app = app(&db, AuthConfig::default(), SessionRegistry::default());

    let response = app.oneshot(get("/mcp/sse", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_configured_keys_are_enforced() {
    let db = TestDb::new(false).await;
    let auth = AuthConfig::from_keys(vec!["right".to_string()]);
    let app = app(&db, auth, SessionRegistry::default());

    let response = app
        .clone()
        .oneshot(get("/mcp/sse", Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(get("/mcp/sse", Some("right"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_session_round_trip() {
    let db = TestDb::new(false).await;
    let sessions = SessionRegistry::default();
    let app = app(&db, AuthConfig::default(), sessions.clone());

    let response = app
        .clone()
        .oneshot(get("/mcp/sse", Some("test")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = response.into_body().into_data_stream();

    let (event, endpoint) = next_event(&mut stream).await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/mcp/messages?sessionId="));
    assert_eq!(sessions.len(), 1);

    let accepted = app
        .clone()
        .oneshot(post(&endpoint, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let (event, data) = next_event(&mut stream).await;
    assert_eq!(event, "message");
    let message: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(message["id"], 1);
    assert_eq!(message["result"], serde_json::json!({}));

    drop(stream);
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_post_session_errors() {
    let db = TestDb::new(false).await;
    let app = app(&db, AuthConfig::default(), SessionRegistry::default());

    let missing = app
        .clone()
        .oneshot(post("/mcp/messages", "{}"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .oneshot(post(
            "/mcp/messages?sessionId=00000000-0000-0000-0000-000000000000",
            "{}",
        ))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}
