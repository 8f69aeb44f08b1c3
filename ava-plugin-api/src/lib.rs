//! ava-plugin-api - Plugin API for ava
//!
//! This crate provides the traits and types needed to write ava plugins.
//! Plugins are Rust types exported from a dynamic library (or linked
//! directly into the host) whose lifecycle is driven by the host's
//! plugin manager: load, start, stop, unload.
//!
//! # Example
//!
//! ```ignore
//! use ava_plugin_api::{
//!     Plugin, PluginConstruct, PluginContext, PluginDescriptor, PluginError, PluginInit,
//!     export_plugins,
//! };
//!
//! pub struct MyPlugin;
//!
//! #[async_trait::async_trait]
//! impl Plugin for MyPlugin {
//!     fn descriptor(&self) -> PluginDescriptor {
//!         PluginDescriptor::new("my-plugin", "0.1.0")
//!             .with_description("My custom plugin")
//!             .with_author("me")
//!     }
//!
//!     async fn load(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
//!         Ok(true)
//!     }
//!
//!     async fn unload(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
//!         Ok(true)
//!     }
//! }
//!
//! impl PluginConstruct for MyPlugin {
//!     fn construct(_init: PluginInit) -> Self {
//!         MyPlugin
//!     }
//! }
//!
//! export_plugins!(MyPlugin);
//! ```

pub mod bus;
pub mod class;
pub mod context;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use bus::{
    APP_SHUTDOWN_REQUESTED, BusEvent, EventBus, EventHandler, EventSeq, PLUGIN_STATE_CHANGED,
    SubscriptionId,
};
pub use class::{PluginClass, PluginConstruct, PluginInit};
pub use context::{PluginContext, TaskShutdown};
pub use error::PluginError;
pub use types::*;

/// Current plugin API version. Plugin packages must match this exactly.
pub const API_VERSION: u32 = 1;

/// The core plugin trait.
///
/// Each lifecycle operation returns `Ok(true)` on success, `Ok(false)` to
/// decline, or an error. The host treats errors, panics and a
/// [`PluginContext::set_state`] report of `Error` as failures.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Return plugin metadata. Must be cheap and side-effect-free.
    fn descriptor(&self) -> PluginDescriptor;

    /// Acquire resources. Called once per instance.
    async fn load(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError>;

    /// Begin active work (subscriptions, background tasks).
    async fn start(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        Ok(true)
    }

    /// Halt active work. Background tasks spawned through the context are
    /// cancelled by the host after this returns successfully.
    async fn stop(&mut self, _ctx: &mut PluginContext) -> Result<bool, PluginError> {
        Ok(true)
    }

    /// Release resources acquired in `load`.
    async fn unload(&mut self, ctx: &mut PluginContext) -> Result<bool, PluginError>;
}

/// Export plugin types for dynamic loading.
///
/// Generates the C ABI entry points the host looks up when it discovers a
/// plugin package. Every listed type must implement [`PluginConstruct`].
///
/// # Usage
///
/// ```ignore
/// ava_plugin_api::export_plugins!(FirstPlugin, SecondPlugin);
/// ```
///
/// # Generated Functions
///
/// - `_ava_plugin_api_version()`: Returns the API version
/// - `_ava_plugin_classes()`: Returns a boxed `Vec<PluginClass>`, owned by the caller
#[macro_export]
macro_rules! export_plugins {
    ($($plugin_type:ty),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _ava_plugin_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _ava_plugin_classes() -> *mut ::std::vec::Vec<$crate::PluginClass> {
            let classes: ::std::vec::Vec<$crate::PluginClass> =
                vec![$($crate::PluginClass::of::<$plugin_type>()),+];
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(classes))
        }
    };
}
