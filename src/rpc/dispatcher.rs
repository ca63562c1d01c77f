//! Method dispatch table.
//!
//! Handlers are registered on a [`DispatcherBuilder`] at startup; `build()`
//! freezes the table into an immutable [`Dispatcher`] that every connection
//! shares through an `Arc` without locking.

use crate::rpc::message::RpcError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::error;

pub type HandlerResult = Result<Value, RpcError>;
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

type SyncHandler = Arc<dyn Fn(Value) -> HandlerResult + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

enum Handler {
    /// Answered inline, no deadline.
    Sync(SyncHandler),
    /// Returns pending work that the request tracker bounds with a deadline.
    Async(AsyncHandler),
}

/// Outcome of dispatching one request.
pub enum Dispatch {
    Ready(HandlerResult),
    Pending(HandlerFuture),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Handler>,
}

impl DispatcherBuilder {
    /// Register a handler that answers immediately.
    pub fn register<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .insert(method.into(), Handler::Sync(Arc::new(handler)));
        self
    }

    /// Register a handler whose result arrives asynchronously.
    pub fn register_async<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |params| handler(params).boxed());
        self.handlers.insert(method.into(), Handler::Async(handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Look up `method` and invoke its handler.
    ///
    /// Panics raised by a handler, synchronously or while its future is
    /// polled, become an execution error instead of unwinding into the
    /// connection.
    pub fn dispatch(&self, method: &str, params: Value) -> Dispatch {
        match self.handlers.get(method) {
            None => Dispatch::Ready(Err(RpcError::method_not_found(method))),
            Some(Handler::Sync(handler)) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(params)));
                Dispatch::Ready(outcome.unwrap_or_else(|panic| Err(panic_error(method, panic))))
            }
            Some(Handler::Async(handler)) => {
                let future = match catch_unwind(AssertUnwindSafe(|| handler(params))) {
                    Ok(future) => future,
                    Err(panic) => return Dispatch::Ready(Err(panic_error(method, panic))),
                };
                let method = method.to_string();
                Dispatch::Pending(
                    AssertUnwindSafe(future)
                        .catch_unwind()
                        .map(move |outcome| {
                            outcome.unwrap_or_else(|panic| Err(panic_error(&method, panic)))
                        })
                        .boxed(),
                )
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods())
            .finish()
    }
}

fn panic_error(method: &str, panic: Box<dyn Any + Send>) -> RpcError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    error!(method = %method, panic = %message, "Handler panicked");
    RpcError::execution(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::codes;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .register("echo", Ok)
            .register("fail", |_| Err(RpcError::execution("boom")))
            .register("explode", |_| panic!("sync kaboom"))
            .register_async("slow_echo", |params| async move { Ok(params) })
            .register_async("async_explode", |_| async move {
                if true {
                    panic!("async kaboom");
                }
                Ok(Value::Null)
            })
            .build()
    }

    #[test]
    fn test_sync_dispatch() {
        match dispatcher().dispatch("echo", json!({"x": 1})) {
            Dispatch::Ready(Ok(v)) => assert_eq!(v, json!({"x": 1})),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method() {
        match dispatcher().dispatch("nope", Value::Null) {
            Dispatch::Ready(Err(e)) => {
                assert_eq!(e.code, codes::METHOD_NOT_FOUND);
                assert_eq!(e.message, "Method not found: nope");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sync_error_passes_through() {
        match dispatcher().dispatch("fail", Value::Null) {
            Dispatch::Ready(Err(e)) => assert_eq!(e.code, codes::EXECUTION_ERROR),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sync_panic_becomes_execution_error() {
        match dispatcher().dispatch("explode", Value::Null) {
            Dispatch::Ready(Err(e)) => {
                assert_eq!(e.code, codes::EXECUTION_ERROR);
                assert_eq!(e.message, "sync kaboom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_async_dispatch() {
        let Dispatch::Pending(fut) = dispatcher().dispatch("slow_echo", json!([1, 2])) else {
            panic!("expected pending");
        };
        assert_eq!(fut.await.unwrap(), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_async_panic_becomes_execution_error() {
        let Dispatch::Pending(fut) = dispatcher().dispatch("async_explode", Value::Null) else {
            panic!("expected pending");
        };
        let err = fut.await.unwrap_err();
        assert_eq!(err.code, codes::EXECUTION_ERROR);
        assert_eq!(err.message, "async kaboom");
    }

    #[test]
    fn test_methods_sorted() {
        let d = dispatcher();
        assert_eq!(
            d.methods(),
            vec!["async_explode", "echo", "explode", "fail", "slow_echo"]
        );
        assert!(d.contains("echo"));
        assert!(!d.contains("missing"));
    }
}
