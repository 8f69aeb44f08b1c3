//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugins can return from lifecycle operations
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor failed validation
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A setting could not be read as the requested type
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The plugin was constructed without an event bus
    #[error("No event bus available to plugin '{0}'")]
    NoEventBus(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
