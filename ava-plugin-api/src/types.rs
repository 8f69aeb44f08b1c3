//! Plugin metadata and lifecycle state types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::PluginError;

/// Lifecycle state of a plugin instance.
///
/// ```text
/// Unloaded -> Loaded -> Started <-> Stopped
///                 \                    /
///                  +----> Unloaded <--+
/// any -> Error, Error -> Unloaded (forced)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Unloaded,
    Loaded,
    Started,
    Stopped,
    Error,
}

impl LifecycleState {
    /// Lowercase name used in events and persisted output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Unloaded, Loaded)
                | (Loaded, Started)
                | (Started, Stopped)
                | (Stopped, Started)
                | (Loaded, Unloaded)
                | (Stopped, Unloaded)
                | (Error, Unloaded)
                | (_, Error)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a configuration option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Str,
    Int,
    Float,
    Bool,
    Any,
}

impl fmt::Display for SettingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// A single entry of a plugin's configuration schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    /// Declared type; `None` accepts any value
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SettingType>,
    /// Value used when the option is unset or invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<toml::Value>,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl ConfigOption {
    pub fn new(kind: SettingType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<toml::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Option name to option definition
pub type ConfigSchema = BTreeMap<String, ConfigOption>;

/// Static metadata a plugin reports about itself.
///
/// Produced once per registered plugin by probing a freshly constructed
/// instance, then treated as immutable by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name
    pub name: String,
    /// Plugin version (semver)
    pub version: String,
    /// Human-readable description
    pub description: String,
    /// Plugin author
    pub author: String,
    /// Names of plugins that must be loaded first
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Events this plugin listens to (advisory)
    #[serde(default)]
    pub event_subscriptions: BTreeSet<String>,
    /// Events this plugin emits (advisory)
    #[serde(default)]
    pub event_emissions: BTreeSet<String>,
    /// Configuration options with defaults
    #[serde(default)]
    pub config_schema: ConfigSchema,
    /// Whether the plugin is enabled the first time it is seen
    #[serde(default = "default_enabled")]
    pub enabled_by_default: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for PluginDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            description: String::new(),
            author: String::new(),
            dependencies: BTreeSet::new(),
            event_subscriptions: BTreeSet::new(),
            event_emissions: BTreeSet::new(),
            config_schema: ConfigSchema::new(),
            enabled_by_default: true,
        }
    }
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn depends_on(mut self, plugin: impl Into<String>) -> Self {
        self.dependencies.insert(plugin.into());
        self
    }

    pub fn subscribes_to(mut self, event: impl Into<String>) -> Self {
        self.event_subscriptions.insert(event.into());
        self
    }

    pub fn emits(mut self, event: impl Into<String>) -> Self {
        self.event_emissions.insert(event.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, option: ConfigOption) -> Self {
        self.config_schema.insert(key.into(), option);
        self
    }

    pub fn enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    /// Check that the required metadata fields are present.
    pub fn validate(&self) -> Result<(), PluginError> {
        let required = [
            ("name", &self.name),
            ("version", &self.version),
            ("description", &self.description),
            ("author", &self.author),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(PluginError::InvalidDescriptor(format!(
                    "missing required field '{field}'"
                )));
            }
        }
        Ok(())
    }
}
