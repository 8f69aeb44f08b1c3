//! XDG Base Directory paths for ava.
//!
//! Plugins and their persisted configuration live under the config
//! directory; a project may carry its own plugins under `.ava/plugins`.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "ava";

/// Get the ava config directory.
///
/// Returns `$XDG_CONFIG_HOME/ava` if set, otherwise `~/.config/ava`.
///
/// # Examples
///
/// ```
/// use ava_paths::config_dir;
///
/// let plugins = config_dir().join("plugins");
/// ```
pub fn config_dir() -> PathBuf {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".config").join(APP_DIR)
    } else {
        PathBuf::from(".config").join(APP_DIR)
    }
}

/// Get the ava data directory.
///
/// Returns `$XDG_DATA_HOME/ava` if set, otherwise `~/.local/share/ava`.
pub fn data_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data).join(APP_DIR)
    } else if let Some(home) = dirs::home_dir() {
        home.join(".local/share").join(APP_DIR)
    } else {
        PathBuf::from(".local/share").join(APP_DIR)
    }
}

/// User plugin directory, scanned for plugin packages.
pub fn user_plugin_dir() -> PathBuf {
    config_dir().join("plugins")
}

/// Persisted plugin configuration (enabled set and per-plugin settings).
pub fn plugin_config_path() -> PathBuf {
    user_plugin_dir().join("plugins.toml")
}

/// Project-local plugin directory under `root`.
pub fn project_plugin_dir(root: &Path) -> PathBuf {
    root.join(".ava").join("plugins")
}
