//! Plugin host error types

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Plugin-supplied operation the host invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Load,
    Start,
    Stop,
    Unload,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unload => "unload",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the plugin host
#[derive(Error, Debug)]
pub enum PluginHostError {
    // ─── Discovery ───────────────────────────────────────────────────
    /// Discovery path missing or not a directory
    #[error("Plugin directory not found: {path}")]
    PluginDirNotFound { path: PathBuf },

    /// Plugin library not found in directory
    #[error("Plugin library not found in {dir}")]
    LibraryNotFound { dir: PathBuf },

    /// API version mismatch between host and plugin package
    #[error("API version mismatch: ava expects {expected}, plugin has {found}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// Failed to load dynamic library
    #[error("Failed to load plugin library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Package exported no plugin classes
    #[error("Plugin package {path} exports no plugin classes")]
    EmptyPackage { path: PathBuf },

    /// Constructing a class to read its descriptor panicked
    #[error("Probing plugin class '{class}' panicked: {message}")]
    ProbePanicked { class: String, message: String },

    // ─── Validation ──────────────────────────────────────────────────
    /// Descriptor is missing required metadata
    #[error("Plugin class '{class}' has an invalid descriptor: {reason}")]
    InvalidDescriptor { class: String, reason: String },

    /// A plugin with the same name is already registered
    #[error("Plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    // ─── Dependencies ────────────────────────────────────────────────
    /// Plugin not registered
    #[error("Plugin '{name}' is not registered")]
    NotRegistered { name: String },

    /// Plugin not in the active table
    #[error("Plugin '{name}' is not loaded")]
    NotLoaded { name: String },

    /// Declared dependencies are not registered
    #[error("Plugin '{name}' has missing dependencies: {}", missing.join(", "))]
    MissingDependencies { name: String, missing: Vec<String> },

    /// Started dependents prevent stopping
    #[error("Plugin '{name}' is required by started plugins: {}", dependents.join(", "))]
    ActiveDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// Plugin failed earlier and must be unloaded before reuse
    #[error("Plugin '{name}' is in the error state")]
    InErrorState { name: String },

    // ─── Lifecycle ───────────────────────────────────────────────────
    /// Plugin returned an error from a lifecycle operation
    #[error("Plugin '{name}' failed to {op}: {source}")]
    Lifecycle {
        name: String,
        op: LifecycleOp,
        #[source]
        source: ava_plugin_api::PluginError,
    },

    /// Plugin declined a lifecycle operation
    #[error("Plugin '{name}' declined to {op}")]
    Declined { name: String, op: LifecycleOp },

    /// Plugin constructor panicked
    #[error("Plugin '{name}' panicked while being constructed: {message}")]
    ConstructPanicked { name: String, message: String },

    /// Plugin panicked during a lifecycle operation
    #[error("Plugin '{name}' panicked during {op}: {message}")]
    Panicked {
        name: String,
        op: LifecycleOp,
        message: String,
    },

    /// Plugin reported the error state from inside an operation
    #[error("Plugin '{name}' reported an error during {op}")]
    ReportedError { name: String, op: LifecycleOp },

    /// Plugin timed out
    #[error("Plugin '{name}' timed out during {op} after {timeout:?}")]
    Timeout {
        name: String,
        op: LifecycleOp,
        timeout: Duration,
    },

    // ─── Configuration ───────────────────────────────────────────────
    /// Config store error (parsing, saving, etc.)
    #[error("Plugin config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
