//! Plugin registry - the catalogue of known plugin classes
//!
//! The registry owns every registered class together with the descriptor
//! read from it at registration time, and the libraries those classes
//! came from.

use libloading::Library;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use ava_plugin_api::{PluginClass, PluginDescriptor, PluginInit};

use super::discovery;
use super::error::{PluginHostError, panic_message};

struct RegisteredPlugin {
    class: PluginClass,
    descriptor: PluginDescriptor,
}

/// Catalogue of registered plugins, keyed by name
#[derive(Default)]
pub struct PluginRegistry {
    /// Registered classes; declared before `libraries` so classes are
    /// dropped before the code they point into is unloaded.
    plugins: BTreeMap<String, RegisteredPlugin>,
    discovery_paths: Vec<PathBuf>,
    opened: HashSet<PathBuf>,
    libraries: Vec<Library>,
    generation: u64,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory to scan on the next [`discover_plugins`](Self::discover_plugins).
    ///
    /// Paths that do not exist or are not directories are logged and
    /// ignored. Returns whether the path was added.
    pub fn add_discovery_path(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let canonical = match path.canonicalize() {
            Ok(canonical) if canonical.is_dir() => canonical,
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Discovery path is not a directory, ignoring");
                return false;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discovery path not found, ignoring");
                return false;
            }
        };

        if self.discovery_paths.contains(&canonical) {
            return false;
        }
        tracing::debug!(path = %canonical.display(), "Added discovery path");
        self.discovery_paths.push(canonical);
        true
    }

    pub fn discovery_paths(&self) -> &[PathBuf] {
        &self.discovery_paths
    }

    /// Scan every discovery path and register the classes found.
    ///
    /// Packages that fail to load and classes that fail validation are
    /// logged and skipped. Returns the number of newly registered plugins.
    pub fn discover_plugins(&mut self) -> usize {
        let mut registered = 0;

        for dir in self.discovery_paths.clone() {
            let packages = match discovery::scan_directory(&dir) {
                Ok(packages) => packages,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to scan discovery path");
                    continue;
                }
            };

            for package in packages {
                if self.opened.contains(&package.library) {
                    continue;
                }
                let opened = match discovery::open_package(&package.library) {
                    Ok(opened) => opened,
                    Err(e) => {
                        tracing::warn!(
                            package = %package.dir.display(),
                            error = %e,
                            "Failed to load plugin package"
                        );
                        continue;
                    }
                };

                for class in opened.classes {
                    if self.register_plugin_class(class) {
                        registered += 1;
                    }
                }
                self.opened.insert(package.library);
                self.libraries.push(opened.library);
            }
        }

        tracing::info!(registered, total = self.plugins.len(), "Plugin discovery complete");
        registered
    }

    /// Register a plugin class directly.
    ///
    /// Returns `false` if the descriptor is invalid or the name is taken.
    pub fn register_plugin_class(&mut self, class: PluginClass) -> bool {
        match self.try_register(class) {
            Ok(descriptor) => {
                tracing::info!(
                    plugin = %descriptor.name,
                    version = %descriptor.version,
                    "Plugin registered"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Plugin registration rejected");
                false
            }
        }
    }

    fn try_register(&mut self, class: PluginClass) -> Result<PluginDescriptor, PluginHostError> {
        let descriptor = std::panic::catch_unwind(AssertUnwindSafe(|| {
            class.instantiate(PluginInit::probe()).descriptor()
        }))
        .map_err(|payload| PluginHostError::ProbePanicked {
            class: class.type_name().to_string(),
            message: panic_message(payload.as_ref()),
        })?;

        descriptor
            .validate()
            .map_err(|e| PluginHostError::InvalidDescriptor {
                class: class.type_name().to_string(),
                reason: e.to_string(),
            })?;

        if self.plugins.contains_key(&descriptor.name) {
            return Err(PluginHostError::DuplicatePlugin {
                name: descriptor.name,
            });
        }

        self.plugins.insert(
            descriptor.name.clone(),
            RegisteredPlugin {
                class,
                descriptor: descriptor.clone(),
            },
        );
        self.generation += 1;
        Ok(descriptor)
    }

    /// Remove a plugin; returns whether it was registered
    pub fn unregister_plugin(&mut self, name: &str) -> bool {
        let removed = self.plugins.remove(name).is_some();
        if removed {
            self.generation += 1;
            tracing::info!(plugin = %name, "Plugin unregistered");
        }
        removed
    }

    pub fn get_plugin_class(&self, name: &str) -> Option<&PluginClass> {
        self.plugins.get(name).map(|p| &p.class)
    }

    pub fn get_plugin_metadata(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.get(name).map(|p| &p.descriptor)
    }

    /// Descriptors of every registered plugin, ordered by name
    pub fn get_all_metadata(&self) -> Vec<&PluginDescriptor> {
        self.plugins.values().map(|p| &p.descriptor).collect()
    }

    pub fn is_plugin_registered(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered plugins that declare `dependency`, ordered by name
    pub fn get_plugins_by_dependency(&self, dependency: &str) -> Vec<String> {
        self.plugins
            .values()
            .filter(|p| p.descriptor.dependencies.contains(dependency))
            .map(|p| p.descriptor.name.clone())
            .collect()
    }

    /// Names required by `name` that are not registered.
    ///
    /// An empty result means the plugin can be loaded. An unregistered
    /// plugin reports itself as missing.
    pub fn check_dependencies(&self, name: &str) -> Vec<String> {
        let Some(plugin) = self.plugins.get(name) else {
            return vec![name.to_string()];
        };
        plugin
            .descriptor
            .dependencies
            .iter()
            .filter(|dep| !self.plugins.contains_key(*dep))
            .cloned()
            .collect()
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Incremented on every registration change
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
