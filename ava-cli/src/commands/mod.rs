pub mod plugin;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use ava_core::{ManagerConfig, MemoryEventBus, PluginConfig, PluginManager};

/// Manager settings for the current directory, with `extra` directories
/// searched before the project and user plugin directories
pub fn manager_config(extra: &[PathBuf]) -> ManagerConfig {
    let mut settings = match std::env::current_dir() {
        Ok(cwd) => ManagerConfig::default().with_project_dir(&cwd),
        Err(_) => ManagerConfig::default(),
    };
    for (i, dir) in extra.iter().enumerate() {
        settings.discovery_paths.insert(i, dir.clone());
    }
    settings
}

/// A manager with the built-in plugins registered and discovery paths scanned
pub fn open_manager(settings: ManagerConfig, config: PluginConfig) -> PluginManager {
    let mut manager = PluginManager::new(settings, Arc::new(MemoryEventBus::default()), Box::new(config));
    for class in ava_heartbeat::builtin_classes() {
        manager.register_plugin_class(class);
    }
    manager.discover_plugins();
    manager
}
