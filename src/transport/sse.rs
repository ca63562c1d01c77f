//! Server-Sent Events transport.
//!
//! `GET {sse_path}` opens a session: the first event (`endpoint`) names the
//! URL to POST requests to, and every response or notification for the
//! session follows as a `message` event. `POST {messages_path}?sessionId=..`
//! feeds one body into the session's connection and answers `202 Accepted`.
//! Dropping the stream ends the session and aborts its pending requests.

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::DbPool;
use crate::error::{AdsError, AdsResult};
use crate::mcp::{SERVER_NAME, SERVER_VERSION};
use crate::rpc::{Connection, Outbound, ServerContext};
use crate::transport::{Transport, announce_listening, bind_with_retry, wait_for_signal};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

/// Live SSE sessions by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,
}

impl SessionRegistry {
    fn insert(&self, id: Uuid, connection: Arc<Connection>) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, connection);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    fn remove(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.sessions.write().ok()?.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its session when the event stream is dropped.
struct SessionGuard {
    id: Uuid,
    sessions: SessionRegistry,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.sessions.remove(&self.id) {
            connection.close();
        }
        info!(session = %self.id, "SSE session closed");
    }
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<ServerContext>,
    sessions: SessionRegistry,
    messages_path: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Routes served by the SSE transport.
#[derive(Debug, Clone)]
pub struct SsePaths {
    pub sse_path: String,
    pub messages_path: String,
}

/// Build the HTTP router. `/` and `/health` are public; the MCP routes sit
/// behind the bearer gate.
pub fn router(
    ctx: Arc<ServerContext>,
    paths: &SsePaths,
    auth: AuthConfig,
    sessions: SessionRegistry,
) -> Router {
    let state = AppState {
        ctx,
        sessions,
        messages_path: Arc::from(paths.messages_path.as_str()),
    };

    let mcp = Router::new()
        .route(&paths.sse_path, get(open_stream))
        .route(&paths.messages_path, post(post_message))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(auth),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .merge(mcp)
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "name": SERVER_NAME,
        "version": SERVER_VERSION,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn open_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4();
    let (outbound, rx) = Outbound::channel();
    let connection = Arc::new(Connection::new(format!("sse:{}", id), &state.ctx, outbound));
    state.sessions.insert(id, connection);
    info!(session = %id, sessions = state.sessions.len(), "SSE session opened");

    let guard = SessionGuard {
        id,
        sessions: state.sessions.clone(),
    };
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?sessionId={}", state.messages_path, id));

    Sse::new(stream::once(async move { Ok(endpoint) }).chain(messages(rx, guard)))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

fn messages(
    rx: mpsc::UnboundedReceiver<String>,
    guard: SessionGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let line = rx.recv().await?;
        debug!(session = %guard.id, "Pushing SSE message");
        Some((Ok(Event::default().event("message").data(line)), (rx, guard)))
    })
}

async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Response {
    let Some(raw) = query.session_id else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    let connection = Uuid::parse_str(&raw)
        .ok()
        .and_then(|id| state.sessions.get(&id));
    let Some(connection) = connection else {
        warn!(session = %raw, "POST for unknown session");
        return (StatusCode::NOT_FOUND, "Unknown session").into_response();
    };

    connection.handle_text(&body);
    StatusCode::ACCEPTED.into_response()
}

pub struct SseTransport {
    ctx: Arc<ServerContext>,
    pool: Arc<DbPool>,
    host: String,
    base_port: u16,
    port_attempts: u16,
    paths: SsePaths,
    auth: AuthConfig,
}

impl SseTransport {
    pub fn new(
        ctx: Arc<ServerContext>,
        pool: Arc<DbPool>,
        host: impl Into<String>,
        base_port: u16,
        port_attempts: u16,
        paths: SsePaths,
        auth: AuthConfig,
    ) -> Self {
        Self {
            ctx,
            pool,
            host: host.into(),
            base_port,
            port_attempts,
            paths,
            auth,
        }
    }
}

impl Transport for SseTransport {
    async fn run(&self) -> AdsResult<()> {
        let (listener, port) =
            bind_with_retry(&self.host, self.base_port, self.port_attempts).await?;
        let app = router(
            self.ctx.clone(),
            &self.paths,
            self.auth.clone(),
            SessionRegistry::default(),
        );
        info!(
            sse_path = %self.paths.sse_path,
            messages_path = %self.paths.messages_path,
            restricted = self.auth.is_restricted(),
            "MCP endpoints ready"
        );
        announce_listening(self.name(), &self.host, port)?;

        // Open SSE streams keep the server alive, so shutdown is forced
        // after a timeout or a second signal.
        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let notify = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            notify.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(AdsError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for sessions to close (send signal again to force exit)..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => warn!("Graceful shutdown timeout, forcing exit"),
                    _ = wait_for_signal() => warn!("Received second signal, forcing immediate exit"),
                }
            } => {}
        }

        info!("Closing database connections");
        self.pool.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sse"
    }
}
