//! Per-connection tracking of in-flight asynchronous requests.
//!
//! Each tracked request gets a [`PendingRequest`] and its own task. The task
//! races the handler future against the request deadline; whichever finishes
//! first moves the request out of `Pending` and writes the only response for
//! that id. The loser is dropped, so a late handler result is never written.

use crate::rpc::dispatcher::HandlerFuture;
use crate::rpc::message::{RequestId, Response, RpcError};
use crate::rpc::outbound::Outbound;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Deadline applied to asynchronous handlers.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of a tracked request. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Pending = 0,
    Completed = 1,
    TimedOut = 2,
    Errored = 3,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Completed,
            2 => Self::TimedOut,
            3 => Self::Errored,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    method: String,
    started: Instant,
    deadline: Instant,
    state: AtomicU8,
}

impl PendingRequest {
    pub fn new(id: RequestId, method: impl Into<String>, timeout: Duration) -> Self {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        Self {
            id,
            method: method.into(),
            started,
            deadline,
            state: AtomicU8::new(RequestState::Pending as u8),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move out of `Pending` into `to`.
    ///
    /// Only the first caller succeeds; later calls return `false` and leave
    /// the state untouched.
    pub fn settle(&self, to: RequestState) -> bool {
        debug_assert_ne!(to, RequestState::Pending);
        self.state
            .compare_exchange(
                RequestState::Pending as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

struct TrackedEntry {
    request: Arc<PendingRequest>,
    task: Option<AbortHandle>,
}

struct TrackerInner {
    timeout: Duration,
    outbound: Outbound,
    pending: Mutex<HashMap<RequestId, TrackedEntry>>,
    count: watch::Sender<usize>,
}

impl TrackerInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, TrackedEntry>> {
        // A panic while holding this lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, request: &Arc<PendingRequest>) {
        let mut pending = self.lock();
        let same = pending
            .get(request.id())
            .is_some_and(|entry| Arc::ptr_eq(&entry.request, request));
        if same {
            pending.remove(request.id());
        }
        self.count.send_replace(pending.len());
    }

    fn finish(&self, request: &Arc<PendingRequest>, state: RequestState, result: Result<serde_json::Value, RpcError>) {
        if !request.settle(state) {
            debug!(id = %request.id(), method = %request.method(), "Discarding late settlement");
            return;
        }
        self.remove(request);

        let elapsed_ms = request.started.elapsed().as_millis() as u64;
        match state {
            RequestState::TimedOut => warn!(
                id = %request.id(),
                method = %request.method(),
                elapsed_ms,
                "Request timed out"
            ),
            RequestState::Errored => debug!(
                id = %request.id(),
                method = %request.method(),
                elapsed_ms,
                "Request failed"
            ),
            _ => debug!(
                id = %request.id(),
                method = %request.method(),
                elapsed_ms,
                "Request completed"
            ),
        }

        let response = Response::from_result(request.id().clone(), result);
        if !self.outbound.send(&response) {
            warn!(id = %request.id(), "Peer is gone; response dropped");
        }
    }
}

/// Tracks the pending requests of one connection.
#[derive(Clone)]
pub struct RequestTracker {
    inner: Arc<TrackerInner>,
}

impl RequestTracker {
    pub fn new(outbound: Outbound, timeout: Duration) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                timeout,
                outbound,
                pending: Mutex::new(HashMap::new()),
                count,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Start tracking `work` for request `id`.
    ///
    /// The deadline starts now, before the handler is first polled. Fails
    /// with `Invalid Request` when `id` is already pending on this
    /// connection; nothing is spawned in that case.
    pub fn track(
        &self,
        id: RequestId,
        method: &str,
        work: HandlerFuture,
    ) -> Result<Arc<PendingRequest>, RpcError> {
        let request = Arc::new(PendingRequest::new(id.clone(), method, self.inner.timeout));
        let mut pending = self.inner.lock();
        if pending.contains_key(&id) {
            return Err(RpcError::invalid_request(format!(
                "Duplicate request id: {id}"
            )));
        }

        let inner = self.inner.clone();
        let tracked = request.clone();
        let task = tokio::spawn(async move {
            let (state, result) = tokio::select! {
                result = work => match result {
                    Ok(value) => (RequestState::Completed, Ok(value)),
                    Err(e) => (RequestState::Errored, Err(e)),
                },
                _ = tokio::time::sleep_until(tracked.deadline()) => {
                    (RequestState::TimedOut, Err(RpcError::timeout()))
                }
            };
            inner.finish(&tracked, state, result);
        });

        // Inserted under the same lock the task needs to remove itself, so
        // the entry always exists before removal is attempted.
        pending.insert(
            id,
            TrackedEntry {
                request: request.clone(),
                task: Some(task.abort_handle()),
            },
        );
        self.inner.count.send_replace(pending.len());
        Ok(request)
    }

    /// Wait until no request is pending.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.count.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    /// Abort every pending request without writing responses. Used when the
    /// connection closes.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<TrackedEntry> = {
            let mut pending = self.inner.lock();
            let drained = pending.drain().map(|(_, entry)| entry).collect();
            self.inner.count.send_replace(0);
            drained
        };

        let mut aborted = 0;
        for entry in drained {
            if entry.request.settle(RequestState::Errored) {
                aborted += 1;
                debug!(
                    id = %entry.request.id(),
                    method = %entry.request.method(),
                    "Aborting request on connection close"
                );
            }
            if let Some(task) = entry.task {
                task.abort();
            }
        }
        aborted
    }
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("timeout", &self.inner.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}
