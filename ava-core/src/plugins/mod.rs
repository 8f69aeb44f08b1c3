//! Plugin system for ava
//!
//! This module provides the infrastructure for discovering and running plugins:
//!
//! - [`PluginRegistry`]: Catalogue of plugin classes and their descriptors
//! - [`DependencyGraph`]: Dependency edges and load ordering
//! - [`PluginConfig`]: Persisted enablement and settings ([`PluginConfigStore`])
//! - [`PluginManager`]: Loads, starts, stops and unloads plugins
//! - [`PluginHostError`]: Error types for plugin operations
//!
//! # Plugin Discovery
//!
//! Plugins are discovered from two directories:
//! 1. Project plugins: `.ava/plugins/` (scanned first)
//! 2. User plugins: `~/.config/ava/plugins/`
//!
//! Each subdirectory holding a dynamic library built with
//! `ava_plugin_api::export_plugins!` is a package; see [`discovery`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ava_core::events::MemoryEventBus;
//! use ava_core::plugins::{ManagerConfig, PluginConfig, PluginManager};
//!
//! let bus = Arc::new(MemoryEventBus::default());
//! let config = PluginConfig::load_default()?;
//! let mut manager = PluginManager::new(ManagerConfig::default(), bus, Box::new(config));
//!
//! manager.initialize().await;
//! manager.disable_plugin("tick-logger").await;
//! manager.shutdown().await;
//! ```

mod config;
pub mod discovery;
mod error;
mod graph;
mod manager;
mod registry;

pub use config::{ConfigSummary, PluginConfig, PluginConfigStore, coerce_setting};
pub use discovery::PluginPackage;
pub use error::{LifecycleOp, PluginHostError};
pub use graph::DependencyGraph;
pub use manager::{ManagerConfig, PluginManager, PluginStatus};
pub use registry::PluginRegistry;
