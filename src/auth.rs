//! Bearer API-key gate for the SSE transport's `/mcp/*` routes.
//!
//! Requests must carry `Authorization: Bearer <key>`. With keys configured,
//! the key must match one of them; with none configured, any non-empty
//! bearer value passes.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

const FORMAT_HINT: &str = "Missing or invalid API key format. Expected: Bearer YOUR_API_KEY";

#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    keys: HashSet<String>,
}

impl AuthConfig {
    /// Build from configured keys, ignoring blank entries.
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    /// True when only configured keys are accepted.
    pub fn is_restricted(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Check a presented bearer value.
    pub fn accepts(&self, provided: &str) -> bool {
        if !self.is_restricted() {
            return true;
        }
        let mut found = false;
        for expected in &self.keys {
            if constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
                found = true;
            }
        }
        found
    }
}

pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = bearer_key(&request) else {
        warn!(path = %request.uri().path(), "Rejected request without bearer key");
        return unauthorized(FORMAT_HINT);
    };

    if auth.accepts(key) {
        debug!(key = %mask_key(key), "Bearer key accepted");
        next.run(request).await
    } else {
        warn!(key = %mask_key(key), "Rejected unknown API key");
        unauthorized("Invalid API key")
    }
}

fn bearer_key(request: &Request<Body>) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let key = value.strip_prefix("Bearer ")?.trim();
    (!key.is_empty()).then_some(key)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

fn mask_key(key: &str) -> String {
    match key.get(..3) {
        Some(prefix) if key.len() > 3 => format!("{}***", prefix),
        _ => "***".to_string(),
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/mcp/sse");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_key_extraction() {
        assert_eq!(bearer_key(&request(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_key(&request(Some("Bearer "))), None);
        assert_eq!(bearer_key(&request(Some("Basic abc"))), None);
        assert_eq!(bearer_key(&request(None)), None);
    }

    #[test]
    fn test_open_gate_accepts_any_key() {
        let auth = AuthConfig::from_keys(vec![" ".to_string()]);
        assert!(!auth.is_restricted());
        assert!(auth.accepts("anything"));
    }

    #[test]
    fn test_restricted_gate() {
        let auth = AuthConfig::from_keys(vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(auth.key_count(), 2);
        assert!(auth.accepts("k2"));
        assert!(!auth.accepts("k3"));
        assert!(!auth.accepts("k"));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcdef"), "abc***");
        assert_eq!(mask_key("ab"), "***");
    }
}
