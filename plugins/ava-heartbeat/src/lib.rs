//! ava-heartbeat - built-in plugins
//!
//! `heartbeat` emits a periodic [`HEARTBEAT_TICK`] event from a supervised
//! background task; `tick-logger` depends on it and logs what it receives.
//! The host links these in directly through [`builtin_classes`], and the
//! crate also builds as a plugin package exporting the same classes.

mod heartbeat;
mod tick_logger;

pub use heartbeat::Heartbeat;
pub use tick_logger::TickLogger;

use ava_plugin_api::PluginClass;

/// Event emitted by `heartbeat` on every tick, payload `{"count": n}`
pub const HEARTBEAT_TICK: &str = "heartbeat_tick";

/// Classes for every plugin in this crate
pub fn builtin_classes() -> Vec<PluginClass> {
    vec![PluginClass::of::<Heartbeat>(), PluginClass::of::<TickLogger>()]
}

ava_plugin_api::export_plugins!(Heartbeat, TickLogger);
