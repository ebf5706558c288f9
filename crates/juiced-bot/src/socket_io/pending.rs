//! Correlated responses.
//!
//! An action that expects an answer registers a [`ResponseMatcher`] before
//! writing its packet. The receive task offers every inbound event to the
//! registered matchers, oldest first; the first match takes the event and
//! the event is not queued for general dispatch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

/// A predicate over `(event, payload)`.
#[derive(Clone)]
pub struct ResponseMatcher {
    predicate: Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>,
}

impl ResponseMatcher {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Matches a single event name.
    pub fn event(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |event, _| event == name)
    }

    /// Matches any of the given event names.
    pub fn events<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        Self::new(move |event, _| names.iter().any(|n| n == event))
    }

    /// Additionally requires `payload[key] == value`.
    pub fn with_field(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        Self::new(move |event, data| {
            self.matches(event, data) && data.get(&key) == Some(&value)
        })
    }

    /// Matches when either matcher does.
    pub fn or(self, other: ResponseMatcher) -> Self {
        Self::new(move |event, data| self.matches(event, data) || other.matches(event, data))
    }

    pub fn matches(&self, event: &str, data: &Value) -> bool {
        (self.predicate)(event, data)
    }
}

impl fmt::Debug for ResponseMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseMatcher")
    }
}

struct Entry {
    id: u64,
    matcher: ResponseMatcher,
    slot: oneshot::Sender<(String, Value)>,
}

/// Registry of responses awaited by in-flight actions.
#[derive(Default)]
pub struct PendingResponses {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl PendingResponses {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a matcher. Dropping the returned guard unregisters it.
    pub fn register(self: &Arc<Self>, matcher: ResponseMatcher) -> PendingResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        self.entries().push(Entry { id, matcher, slot });
        PendingResponse {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Offers an event to the registered matchers.
    ///
    /// Returns true if a matcher took it.
    pub fn resolve(&self, event: &str, data: &Value) -> bool {
        let mut entries = self.entries();
        let mut index = 0;
        while index < entries.len() {
            if entries[index].slot.is_closed() || !entries[index].matcher.matches(event, data) {
                index += 1;
                continue;
            }
            let entry = entries.remove(index);
            if entry.slot.send((event.to_string(), data.clone())).is_ok() {
                return true;
            }
        }
        false
    }

    /// Drops every entry. Waiters observe a closed slot.
    pub fn fail_all(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|entry| entry.id != id);
    }
}

/// An awaited response. Unregisters itself when dropped.
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<(String, Value)>,
    registry: Arc<PendingResponses>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the match. `None` means the connection went away first.
    pub async fn wait(&mut self) -> Option<(String, Value)> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
