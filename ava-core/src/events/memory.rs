//! In-memory EventBus implementation
//!
//! MemoryEventBus dispatches to registered handlers synchronously, keeps a
//! bounded history for replay and mirrors every event onto a broadcast
//! channel for live listeners.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use ava_plugin_api::{BusEvent, EventBus, EventHandler, EventSeq, SubscriptionId};
use chrono::Utc;
use tokio::sync::broadcast;

const DEFAULT_HISTORY_LIMIT: usize = 1024;

struct Subscription {
    id: SubscriptionId,
    event: String,
    handler: EventHandler,
}

/// In-memory implementation of EventBus
///
/// Handler panics are caught and logged; one failing handler never stops
/// delivery to the others.
pub struct MemoryEventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: RwLock<VecDeque<BusEvent>>,
    history_limit: usize,
    next_seq: AtomicU64,
    next_subscription: AtomicU64,
    tx: broadcast::Sender<BusEvent>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            next_seq: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
            tx,
        }
    }

    /// Keep at most `limit` events for replay
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// All retained events starting from a sequence number
    pub fn events_from(&self, seq: EventSeq) -> Vec<BusEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.seq >= seq)
            .cloned()
            .collect()
    }

    /// Retained events with the given name
    pub fn events_named(&self, name: &str) -> Vec<BusEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }

    /// Number of handlers currently registered for `event`
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sub| sub.event == event)
            .count()
    }

    fn record(&self, event: BusEvent) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(event);
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for MemoryEventBus {
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                event: event.to_string(),
                handler,
            });
        tracing::trace!(event = %event, subscription = %id, "Subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }

    fn emit(&self, event: &str, payload: serde_json::Value) -> EventSeq {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = BusEvent {
            seq,
            name: event.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        // Snapshot handlers so they may subscribe or unsubscribe re-entrantly
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sub| sub.event == event.name)
            .map(|sub| (sub.id, sub.handler.clone()))
            .collect();

        for (id, handler) in handlers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::error!(event = %event.name, subscription = %id, "Event handler panicked");
            }
        }

        self.record(event.clone());

        // Broadcast to live listeners (ignore if none)
        let _ = self.tx.send(event);

        seq
    }

    fn listen(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}
