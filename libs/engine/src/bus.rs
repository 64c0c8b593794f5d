//! In-process event bus
//!
//! Fans lifecycle events out to streaming subscribers. Each subscriber
//! owns a bounded channel; delivery is non-blocking and a full buffer
//! drops the event for that subscriber only, counted but never raised.
//! Subscribers see only events published after they subscribed. A small
//! ring buffer of recent events backs inspection endpoints; it is not a
//! durability guarantee.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};

use conductor_common::metrics::METRICS;
use conductor_domain::Event;

/// Default per-subscriber buffer size
pub const DEFAULT_BUFFER: usize = 100;

/// Events retained for inspection
const RING_CAPACITY: usize = 1000;

struct Subscriber {
    id: u64,
    /// Only events for this application are delivered, when set
    app_filter: Option<String>,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicUsize>,
}

/// A live subscription. Dropping the receiver ends delivery; the bus
/// prunes the sender on the next publish.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Event>,
    /// Events dropped for this subscriber because its buffer was full
    pub dropped: Arc<AtomicUsize>,
}

/// Publish/subscribe hub for lifecycle events
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    ring: Mutex<VecDeque<Event>>,
    next_id: AtomicU64,
    dropped_total: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            next_id: AtomicU64::new(0),
            dropped_total: AtomicUsize::new(0),
        }
    }

    /// Register a subscriber with the given buffer size and optional
    /// application filter.
    pub async fn subscribe(&self, app_filter: Option<String>, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicUsize::new(0));

        self.subscribers.write().await.push(Subscriber {
            id,
            app_filter,
            tx,
            dropped: Arc::clone(&dropped),
        });

        Subscription { id, rx, dropped }
    }

    /// Remove a subscriber.
    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Publish an event to every matching subscriber.
    ///
    /// Never blocks and never fails: a full subscriber buffer drops the
    /// event for that subscriber only.
    pub async fn publish(&self, event: &Event) {
        METRICS.events_published_total.inc();

        {
            let mut ring = self.ring.lock().await;
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for subscriber in subscribers.iter() {
                if let Some(filter) = &subscriber.app_filter {
                    if filter != &event.app_name {
                        continue;
                    }
                }
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        METRICS.events_dropped_total.inc();
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(subscriber.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|s| !closed.contains(&s.id));
        }
    }

    /// Recent events, newest last, optionally filtered by application.
    pub async fn recent(&self, app_filter: Option<&str>) -> Vec<Event> {
        self.ring
            .lock()
            .await
            .iter()
            .filter(|e| app_filter.map_or(true, |app| e.app_name == app))
            .cloned()
            .collect()
    }

    /// Total events dropped across all subscribers.
    #[must_use]
    pub fn dropped_total(&self) -> usize {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_domain::event::types;

    fn event(event_type: &str, app: &str) -> Event {
        Event::now(event_type, app, "executor", serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_delivery_and_app_filter() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(None, 10).await;
        let mut billing_only = bus.subscribe(Some("billing".to_string()), 10).await;

        bus.publish(&event(types::WORKFLOW_STARTED, "billing")).await;
        bus.publish(&event(types::WORKFLOW_STARTED, "shipping")).await;

        assert_eq!(all.rx.recv().await.unwrap().app_name, "billing");
        assert_eq!(all.rx.recv().await.unwrap().app_name, "shipping");

        assert_eq!(billing_only.rx.recv().await.unwrap().app_name, "billing");
        assert!(billing_only.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_for_that_subscriber_only() {
        let bus = EventBus::new();
        let mut tiny = bus.subscribe(None, 1).await;
        let mut roomy = bus.subscribe(None, 10).await;

        bus.publish(&event(types::STEP_STARTED, "a")).await;
        bus.publish(&event(types::STEP_COMPLETED, "a")).await;

        // Tiny buffer held one event and dropped the second.
        assert_eq!(tiny.dropped.load(Ordering::Relaxed), 1);
        assert_eq!(tiny.rx.recv().await.unwrap().event_type, "step.started");

        // The roomy subscriber got both.
        assert_eq!(roomy.rx.recv().await.unwrap().event_type, "step.started");
        assert_eq!(roomy.rx.recv().await.unwrap().event_type, "step.completed");
        assert_eq!(bus.dropped_total(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_only_later_events() {
        let bus = EventBus::new();
        bus.publish(&event(types::WORKFLOW_STARTED, "a")).await;

        let mut late = bus.subscribe(None, 10).await;
        bus.publish(&event(types::WORKFLOW_COMPLETED, "a")).await;

        assert_eq!(late.rx.recv().await.unwrap().event_type, "workflow.completed");
        assert!(late.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None, 1).await;
        drop(sub.rx);

        bus.publish(&event(types::STEP_STARTED, "a")).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_recent_ring() {
        let bus = EventBus::new();
        bus.publish(&event(types::STEP_STARTED, "a")).await;
        bus.publish(&event(types::STEP_STARTED, "b")).await;

        assert_eq!(bus.recent(None).await.len(), 2);
        assert_eq!(bus.recent(Some("a")).await.len(), 1);
    }
}
