//! Event system for ava
//!
//! The bus trait and event types live in `ava-plugin-api` so plugins can
//! use them; this module provides the host's implementation.

mod memory;

pub use ava_plugin_api::{
    APP_SHUTDOWN_REQUESTED, BusEvent, EventBus, EventHandler, EventSeq, PLUGIN_STATE_CHANGED,
    SubscriptionId,
};
pub use memory::MemoryEventBus;
