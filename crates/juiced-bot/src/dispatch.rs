//! Named-event handler registry.
//!
//! Handlers run in registration order. An immediate handler runs inline; a
//! suspending handler is awaited before the next one starts. A handler that
//! returns [`Propagation::Stop`] ends the dispatch of that event, and the
//! first error ends it too and is returned to the caller of
//! [`Registry::trigger`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{trace, warn};

use crate::error::BotResult;
use crate::transport::BoxFuture;

/// Whether later handlers see the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

pub type ImmediateFn = dyn Fn(&str, &Value) -> BotResult<Propagation> + Send + Sync;
pub type SuspendingFn = dyn Fn(String, Value) -> BoxFuture<'static, BotResult<Propagation>> + Send + Sync;

/// A registered event handler.
#[derive(Clone)]
pub enum Handler {
    Immediate(Arc<ImmediateFn>),
    Suspending(Arc<SuspendingFn>),
}

impl Handler {
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(&str, &Value) -> BotResult<Propagation> + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(f))
    }

    pub fn suspending<F, Fut>(f: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = BotResult<Propagation>> + Send + 'static,
    {
        Self::Suspending(Arc::new(move |event, data| Box::pin(f(event, data))))
    }

    /// Identity comparison: two handlers are the same if they share the callable.
    pub fn same_as(&self, other: &Handler) -> bool {
        match (self, other) {
            (Self::Immediate(a), Self::Immediate(b)) => Arc::ptr_eq(a, b),
            (Self::Suspending(a), Self::Suspending(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    async fn call(&self, event: &str, data: &Value) -> BotResult<Propagation> {
        match self {
            Self::Immediate(f) => f(event, data),
            Self::Suspending(f) => f(event.to_string(), data.clone()).await,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("Handler::Immediate"),
            Self::Suspending(_) => f.write_str("Handler::Suspending"),
        }
    }
}

/// Event name to ordered handler list.
#[derive(Default)]
pub struct Registry {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler unless it is already registered for `event`.
    pub fn on(&self, event: &str, handler: Handler) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let list = handlers.entry(event.to_string()).or_default();
        if list.iter().any(|h| h.same_as(&handler)) {
            warn!(event, "Handler already registered");
            return;
        }
        list.push(handler);
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !h.same_as(handler));
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Number of handlers registered for `event`.
    pub fn count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Runs the handlers for `event`.
    ///
    /// Handlers added or removed while a dispatch is running take effect on
    /// the next event.
    pub async fn trigger(&self, event: &str, data: &Value) -> BotResult<Propagation> {
        let snapshot = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned();
        let Some(handlers) = snapshot else {
            trace!(event, "No handlers");
            return Ok(Propagation::Continue);
        };
        for handler in &handlers {
            if handler.call(event, data).await? == Propagation::Stop {
                trace!(event, "Propagation stopped");
                return Ok(Propagation::Stop);
            }
        }
        Ok(Propagation::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, result: Propagation) -> Handler {
        let log = Arc::clone(log);
        Handler::immediate(move |_, _| {
            log.lock().unwrap().push(name);
            Ok(result)
        })
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.on("chatMsg", recorder(&log, "a", Propagation::Continue));
        registry.on("chatMsg", recorder(&log, "b", Propagation::Continue));

        let result = registry.trigger("chatMsg", &json!({})).await.unwrap();
        assert_eq!(result, Propagation::Continue);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, "a", Propagation::Continue);
        registry.on("chatMsg", handler.clone());
        registry.on("chatMsg", handler);

        assert_eq!(registry.count("chatMsg"), 1);
        registry.trigger("chatMsg", &Value::Null).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stop_skips_remaining_handlers() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.on("e", recorder(&log, "a", Propagation::Continue));
        registry.on("e", recorder(&log, "b", Propagation::Stop));
        registry.on("e", recorder(&log, "c", Propagation::Continue));

        let result = registry.trigger("e", &Value::Null).await.unwrap();
        assert_eq!(result, Propagation::Stop);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn error_propagates_and_stops() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.on(
            "kick",
            Handler::immediate(|_, data| Err(BotError::Kicked(data["reason"].to_string()))),
        );
        registry.on("kick", recorder(&log, "after", Propagation::Continue));

        let err = registry.trigger("kick", &json!({"reason": "bye"})).await.unwrap_err();
        assert!(matches!(err, BotError::Kicked(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn suspending_handlers_are_awaited_in_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            registry.on(
                "e",
                Handler::suspending(move |event, _| {
                    let log = Arc::clone(&log);
                    async move {
                        tokio::task::yield_now().await;
                        assert_eq!(event, "e");
                        log.lock().unwrap().push("slow");
                        Ok(Propagation::Continue)
                    }
                }),
            );
        }
        registry.on("e", recorder(&log, "fast", Propagation::Continue));

        registry.trigger("e", &Value::Null).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn off_removes_only_that_handler() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder(&log, "a", Propagation::Continue);
        let b = recorder(&log, "b", Propagation::Continue);
        registry.on("e", a.clone());
        registry.on("e", b);

        assert!(registry.off("e", &a));
        assert!(!registry.off("e", &a));
        assert!(!registry.off("other", &a));

        registry.trigger("e", &Value::Null).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn unknown_event_is_a_no_op() {
        let registry = Registry::new();
        assert_eq!(
            registry.trigger("nothing", &Value::Null).await.unwrap(),
            Propagation::Continue
        );
    }
}
