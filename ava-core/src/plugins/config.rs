//! Plugin configuration - enabled set and per-plugin settings
//!
//! Stored as TOML in `~/.config/ava/plugins/plugins.toml`:
//!
//! ```toml
//! enabled = ["heartbeat"]
//! known = ["heartbeat", "tick-logger"]
//!
//! [settings.heartbeat]
//! interval_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ava_plugin_api::{ConfigSchema, PluginDescriptor, SettingType};

use super::error::PluginHostError;

/// Durable store the manager consults for enablement and settings
pub trait PluginConfigStore: Send {
    /// Names currently enabled, in lexical order
    fn get_enabled_plugins(&self) -> Vec<String>;

    fn is_plugin_enabled(&self, name: &str) -> bool;

    fn enable_plugin(&mut self, name: &str);

    fn disable_plugin(&mut self, name: &str);

    /// Seed schema defaults for options the plugin has no value for
    fn apply_defaults_for_plugin(&mut self, name: &str, schema: &ConfigSchema);

    /// Enable plugins that declare `enabled_by_default` the first time
    /// they are seen. Plugins the store already knows keep their state.
    fn enable_plugins_by_default(&mut self, descriptors: &[&PluginDescriptor]);

    /// Stored settings coerced to the schema, with defaults filled in
    fn validate_plugin_settings(&self, name: &str, schema: &ConfigSchema) -> toml::Table;

    fn save_config(&self) -> Result<(), PluginHostError>;
}

/// Counts reported by [`PluginConfig::summary`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub enabled: usize,
    pub known: usize,
    pub configured: usize,
}

/// TOML-backed [`PluginConfigStore`]
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Enabled plugin names
    #[serde(default)]
    enabled: BTreeSet<String>,
    /// Every plugin name the store has made an enablement decision for
    #[serde(default)]
    known: BTreeSet<String>,
    /// Per-plugin settings tables
    #[serde(default)]
    settings: BTreeMap<String, toml::Table>,
    /// Backing file; `None` keeps the config in memory only
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl PluginConfig {
    /// A config that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load config from a TOML file
    ///
    /// Returns an empty config bound to `path` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, PluginHostError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content).map_err(|e| PluginHostError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load from the default location under the ava config directory
    pub fn load_default() -> Result<Self, PluginHostError> {
        Self::load(&ava_paths::plugin_config_path())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Raw stored settings for a plugin
    pub fn get_plugin_settings(&self, name: &str) -> toml::Table {
        self.settings.get(name).cloned().unwrap_or_default()
    }

    pub fn set_plugin_setting(&mut self, name: &str, key: &str, value: toml::Value) {
        self.settings
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Drop all stored settings for a plugin; returns whether any existed
    pub fn remove_plugin_settings(&mut self, name: &str) -> bool {
        self.settings.remove(name).is_some()
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            enabled: self.enabled.len(),
            known: self.known.len(),
            configured: self.settings.len(),
        }
    }
}

impl PluginConfigStore for PluginConfig {
    fn get_enabled_plugins(&self) -> Vec<String> {
        self.enabled.iter().cloned().collect()
    }

    fn is_plugin_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    fn enable_plugin(&mut self, name: &str) {
        self.known.insert(name.to_string());
        self.enabled.insert(name.to_string());
    }

    fn disable_plugin(&mut self, name: &str) {
        self.known.insert(name.to_string());
        self.enabled.remove(name);
    }

    fn apply_defaults_for_plugin(&mut self, name: &str, schema: &ConfigSchema) {
        let defaults: Vec<(&String, &toml::Value)> = schema
            .iter()
            .filter_map(|(key, option)| option.default.as_ref().map(|value| (key, value)))
            .collect();
        if defaults.is_empty() {
            return;
        }

        let settings = self.settings.entry(name.to_string()).or_default();
        for (key, value) in defaults {
            if !settings.contains_key(key) {
                tracing::debug!(plugin = %name, setting = %key, "Applying default setting");
                settings.insert(key.clone(), value.clone());
            }
        }
    }

    fn enable_plugins_by_default(&mut self, descriptors: &[&PluginDescriptor]) {
        for descriptor in descriptors {
            if !self.known.insert(descriptor.name.clone()) {
                continue;
            }
            if descriptor.enabled_by_default {
                tracing::info!(plugin = %descriptor.name, "Enabling plugin by default");
                self.enabled.insert(descriptor.name.clone());
            }
        }
    }

    fn validate_plugin_settings(&self, name: &str, schema: &ConfigSchema) -> toml::Table {
        let stored = self.get_plugin_settings(name);
        if schema.is_empty() {
            return stored;
        }

        let mut validated = toml::Table::new();
        for (key, option) in schema {
            let Some(value) = stored.get(key).or(option.default.as_ref()) else {
                continue;
            };
            let Some(kind) = option.kind else {
                validated.insert(key.clone(), value.clone());
                continue;
            };
            match coerce_setting(value, kind) {
                Some(coerced) => {
                    validated.insert(key.clone(), coerced);
                }
                None => {
                    tracing::warn!(
                        plugin = %name,
                        setting = %key,
                        expected = %kind,
                        "Invalid setting value, using default"
                    );
                    if let Some(default) = &option.default {
                        validated.insert(key.clone(), default.clone());
                    }
                }
            }
        }
        validated
    }

    fn save_config(&self) -> Result<(), PluginHostError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginHostError::Config(e.to_string()))?;

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Convert `value` to `kind`, or `None` if it cannot be represented.
pub fn coerce_setting(value: &toml::Value, kind: SettingType) -> Option<toml::Value> {
    use toml::Value;

    match kind {
        SettingType::Any => Some(value.clone()),
        SettingType::Str => match value {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Integer(i) => Some(Value::String(i.to_string())),
            Value::Float(f) => Some(Value::String(f.to_string())),
            Value::Boolean(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        SettingType::Int => match value {
            Value::Integer(i) => Some(Value::Integer(*i)),
            Value::Float(f) if f.is_finite() => Some(Value::Integer(f.trunc() as i64)),
            Value::Boolean(b) => Some(Value::Integer(i64::from(*b))),
            Value::String(s) => s.trim().parse().ok().map(Value::Integer),
            _ => None,
        },
        SettingType::Float => match value {
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Integer(i) => Some(Value::Float(*i as f64)),
            Value::Boolean(b) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s.trim().parse().ok().map(Value::Float),
            _ => None,
        },
        SettingType::Bool => match value {
            Value::Boolean(b) => Some(Value::Boolean(*b)),
            Value::Integer(i) => Some(Value::Boolean(*i != 0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(Value::Boolean(true)),
                "false" | "no" | "off" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            _ => None,
        },
    }
}
