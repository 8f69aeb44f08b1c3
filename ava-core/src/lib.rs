//! ava-core: plugin host for ava
//!
//! - **Event system** - [`MemoryEventBus`], the host's implementation of
//!   the [`EventBus`] trait shared with plugins
//! - **Plugin system** - [`PluginRegistry`], [`DependencyGraph`] and
//!   [`PluginManager`] for discovering plugins and driving their lifecycle

pub mod events;
pub mod plugins;

pub use events::{BusEvent, EventBus, MemoryEventBus};
pub use plugins::{
    DependencyGraph, ManagerConfig, PluginConfig, PluginConfigStore, PluginHostError,
    PluginManager, PluginRegistry, PluginStatus,
};
