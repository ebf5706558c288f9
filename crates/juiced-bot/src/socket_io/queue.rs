//! Inbound event buffer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

/// What happens when an event arrives and the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Discard the oldest buffered event.
    #[default]
    DropOldest,
    /// Stop reading from the socket until there is room.
    Block,
}

#[derive(Default)]
struct State {
    items: VecDeque<(String, Value)>,
    closed: bool,
}

/// Bounded FIFO of decoded events between the receive task and `recv()`.
pub struct EventQueue {
    state: Mutex<State>,
    capacity: usize,
    policy: QueuePolicy,
    readable: Notify,
    writable: Notify,
}

impl EventQueue {
    /// Creates a queue. A capacity of 0 means unbounded.
    pub fn new(capacity: usize, policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity,
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event. Returns false if the queue is closed.
    pub async fn push(&self, event: (String, Value)) -> bool {
        let mut event = Some(event);
        loop {
            let writable = self.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();
            {
                let mut state = self.state();
                if state.closed {
                    return false;
                }
                let full = self.capacity > 0 && state.items.len() >= self.capacity;
                if full && self.policy == QueuePolicy::DropOldest {
                    if let Some((dropped, _)) = state.items.pop_front() {
                        warn!(event = %dropped, capacity = self.capacity, "Inbound queue full, dropping oldest event");
                    }
                }
                if !full || self.policy == QueuePolicy::DropOldest {
                    if let Some(event) = event.take() {
                        state.items.push_back(event);
                    }
                    self.readable.notify_one();
                    return true;
                }
            }
            writable.await;
        }
    }

    /// Takes the next event, waiting if necessary. `None` once closed.
    pub async fn pop(&self) -> Option<(String, Value)> {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();
            {
                let mut state = self.state();
                if state.closed {
                    return None;
                }
                if let Some(event) = state.items.pop_front() {
                    self.writable.notify_one();
                    return Some(event);
                }
            }
            readable.await;
        }
    }

    /// Discards buffered events and wakes every waiter.
    pub fn close(&self) {
        {
            let mut state = self.state();
            state.closed = true;
            state.items.clear();
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn ev(name: &str) -> (String, Value) {
        (name.to_string(), Value::Null)
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = EventQueue::new(0, QueuePolicy::DropOldest);
        assert!(queue.push(ev("a")).await);
        assert!(queue.push(ev("b")).await);
        assert_eq!(queue.pop().await.unwrap().0, "a");
        assert_eq!(queue.pop().await.unwrap().0, "b");
    }

    #[tokio::test]
    async fn drop_oldest_when_full() {
        let queue = EventQueue::new(2, QueuePolicy::DropOldest);
        for name in ["a", "b", "c"] {
            assert!(queue.push(ev(name)).await);
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().await.unwrap().0, "b");
        assert_eq!(queue.pop().await.unwrap().0, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn block_waits_for_room() {
        let queue = Arc::new(EventQueue::new(1, QueuePolicy::Block));
        assert!(queue.push(ev("a")).await);

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(ev("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await.unwrap().0, "a");
        assert!(producer.await.unwrap());
        assert_eq!(queue.pop().await.unwrap().0, "b");
    }

    #[tokio::test]
    async fn close_wakes_consumer_and_discards() {
        let queue = Arc::new(EventQueue::new(0, QueuePolicy::DropOldest));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert!(consumer.await.unwrap().is_none());

        assert!(!queue.push(ev("late")).await);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_unblocks_producer() {
        let queue = Arc::new(EventQueue::new(1, QueuePolicy::Block));
        queue.push(ev("a")).await;
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(ev("b")).await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert!(!producer.await.unwrap());
    }
}
