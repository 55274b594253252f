//! In-process topic-based publish/subscribe (spec §4.7, C7).
//!
//! Generalizes the per-collection notify channel idiom used throughout the
//! pipeline trackers (a bounded channel drained by a dedicated task) into an
//! explicit multi-topic bus: each `subscribe` call gets its own bounded
//! queue and its own draining task, so a slow handler never blocks the
//! publisher or other handlers. When a handler's queue is full, the oldest
//! queued event is dropped and a counter is incremented — the documented
//! back-pressure behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

/// Default bound for a single handler's pending-event queue.
const DEFAULT_QUEUE_BOUND: usize = 256;

/// A published event: a topic string and a JSON-serialized payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: Value,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            topic: topic.into(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }
}

/// A bounded, drop-oldest event queue shared between a publisher and one
/// subscriber's draining task.
struct HandlerQueue {
    buffer: Mutex<VecDeque<Event>>,
    notify: Notify,
    bound: usize,
    dropped: AtomicU64,
}

impl HandlerQueue {
    fn new(bound: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(bound.min(64))),
            notify: Notify::new(),
            bound,
            dropped: AtomicU64::new(0),
        }
    }

    async fn push(&self, event: Event) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.bound {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
        drop(buffer);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Event {
        loop {
            {
                let mut buffer = self.buffer.lock().await;
                if let Some(event) = buffer.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A topic pattern: either an exact topic or a `prefix.*` wildcard.
fn matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic.starts_with(prefix) && topic[prefix.len()..].starts_with('.'),
        None => pattern == "*" || pattern == topic,
    }
}

struct Subscription {
    pattern: String,
    queue: Arc<HandlerQueue>,
}

/// The process-wide event bus singleton (spec §9).
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

/// Handle returned by `subscribe`: drives the handler loop until dropped.
pub struct Subscriber {
    queue: Arc<HandlerQueue>,
}

impl Subscriber {
    /// Await the next event delivered to this subscription.
    pub async fn recv(&self) -> Event {
        self.queue.pop().await
    }

    /// Number of events dropped because this handler's queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic pattern (`"processing.*"` or an exact
    /// topic like `"inspection.created"`). Returns a `Subscriber` the
    /// caller polls with `recv()` on its own task.
    pub async fn subscribe(&self, pattern: impl Into<String>) -> Subscriber {
        self.subscribe_with_bound(pattern, DEFAULT_QUEUE_BOUND).await
    }

    pub async fn subscribe_with_bound(&self, pattern: impl Into<String>, bound: usize) -> Subscriber {
        let queue = Arc::new(HandlerQueue::new(bound));
        let mut subs = self.subscriptions.lock().await;
        subs.push(Subscription {
            pattern: pattern.into(),
            queue: queue.clone(),
        });
        Subscriber { queue }
    }

    /// Publish an event to every matching subscriber. Delivery to each
    /// handler's queue is immediate (push, not await-drained) so the
    /// publisher never blocks on a slow handler.
    pub async fn publish(&self, event: Event) {
        let subs = self.subscriptions.lock().await;
        for sub in subs.iter() {
            if matches(&sub.pattern, &event.topic) {
                sub.queue.push(event.clone()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_matching_exact_subscriber() {
        let bus = EventBus::new();
        let sub = bus.subscribe("processing.completed").await;
        bus.publish(Event::new("processing.completed", serde_json::json!({"id": 1})))
            .await;
        bus.publish(Event::new("processing.failed", serde_json::json!({"id": 2})))
            .await;

        let event = sub.recv().await;
        assert_eq!(event.topic, "processing.completed");
    }

    #[tokio::test]
    async fn delivers_to_wildcard_subscriber() {
        let bus = EventBus::new();
        let sub = bus.subscribe("processing.*").await;
        bus.publish(Event::new("processing.started", serde_json::Value::Null))
            .await;
        bus.publish(Event::new("processing.completed", serde_json::Value::Null))
            .await;

        assert_eq!(sub.recv().await.topic, "processing.started");
        assert_eq!(sub.recv().await.topic, "processing.completed");
    }

    #[tokio::test]
    async fn drops_oldest_when_queue_is_full() {
        let bus = EventBus::new();
        let sub = bus.subscribe_with_bound("test", 2).await;
        for i in 0..5 {
            bus.publish(Event::new("test", serde_json::json!({"i": i})))
                .await;
        }
        assert_eq!(sub.dropped_count(), 3);
        let first = sub.recv().await;
        assert_eq!(first.payload["i"], 3);
        let second = sub.recv().await;
        assert_eq!(second.payload["i"], 4);
    }
}
