//! EventBus trait shared by the host and plugins
//!
//! Handlers are plain synchronous callbacks; `emit` never blocks on them
//! finishing anything asynchronous. Observers that want a stream can use
//! [`EventBus::listen`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Emitted by the host on every plugin lifecycle transition.
///
/// Payload: `{"plugin": <name>, "old_state": <state>, "new_state": <state>}`
pub const PLUGIN_STATE_CHANGED: &str = "plugin_state_changed";

/// Emitted by the application to request an orderly shutdown.
pub const APP_SHUTDOWN_REQUESTED: &str = "app_shutdown_requested";

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// An event as delivered to handlers and listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub seq: EventSeq,
    pub name: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Callback invoked for each matching event
pub type EventHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Publish/subscribe bus
pub trait EventBus: Send + Sync {
    /// Register `handler` for events named `event`
    fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove a subscription; returns whether it existed
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Deliver an event to every handler registered at the time of the call
    fn emit(&self, event: &str, payload: serde_json::Value) -> EventSeq;

    /// Live stream of every emitted event
    fn listen(&self) -> broadcast::Receiver<BusEvent>;

    /// Sequence number the next event will receive
    fn current_seq(&self) -> EventSeq;
}
