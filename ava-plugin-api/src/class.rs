//! Plugin classes - constructors the host can instantiate on demand

use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

use crate::Plugin;
use crate::bus::EventBus;

/// Arguments handed to a plugin constructor
#[derive(Clone, Default)]
pub struct PluginInit {
    /// Shared event bus; `None` while the host is only probing metadata
    pub event_bus: Option<Arc<dyn EventBus>>,
    /// Validated settings for the plugin
    pub settings: toml::Table,
}

impl PluginInit {
    pub fn new(event_bus: Arc<dyn EventBus>, settings: toml::Table) -> Self {
        Self {
            event_bus: Some(event_bus),
            settings,
        }
    }

    /// Construction arguments used to read a plugin's descriptor.
    /// Constructors must not have side effects when given these.
    pub fn probe() -> Self {
        Self::default()
    }

    pub fn is_probe(&self) -> bool {
        self.event_bus.is_none()
    }

    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .cloned()
            .and_then(|value| value.try_into().ok())
    }
}

impl fmt::Debug for PluginInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInit")
            .field("has_bus", &self.event_bus.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Plugins that can be built from [`PluginInit`]
pub trait PluginConstruct: Plugin + Sized + 'static {
    fn construct(init: PluginInit) -> Self;
}

type Constructor = dyn Fn(PluginInit) -> Box<dyn Plugin> + Send + Sync;

/// A registrable plugin class.
///
/// Classes are what packages export and what the registry stores; the
/// manager instantiates one each time the plugin is loaded.
#[derive(Clone)]
pub struct PluginClass {
    type_name: String,
    construct: Arc<Constructor>,
}

impl PluginClass {
    pub fn new<F>(type_name: impl Into<String>, construct: F) -> Self
    where
        F: Fn(PluginInit) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            construct: Arc::new(construct),
        }
    }

    /// Class for a type implementing [`PluginConstruct`]
    pub fn of<P: PluginConstruct>() -> Self {
        Self::new(std::any::type_name::<P>(), |init| Box::new(P::construct(init)))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn instantiate(&self, init: PluginInit) -> Box<dyn Plugin> {
        (self.construct)(init)
    }
}

impl fmt::Debug for PluginClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginClass")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
