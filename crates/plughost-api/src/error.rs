//! Plugin error types

use std::fmt;

/// Plugin error type
///
/// Variants hold owned strings only, so no trait object from the plugin's
/// binary travels with the error.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Construction of the plugin failed
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Runtime error raised while executing
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// A constructor argument the plugin asked for was not supplied
    #[error("Missing constructor argument: {0}")]
    MissingArgument(String),

    /// A constructor argument had a different type than requested
    #[error("Constructor argument type mismatch: expected {expected}, found {found}")]
    ArgumentType {
        /// Requested type
        expected: String,
        /// Supplied type
        found: String,
    },
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Create a new initialization error
    pub fn init(msg: impl fmt::Display) -> Self {
        Self::InitError(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::ConfigError(msg.to_string())
    }

    /// Create a new runtime error
    pub fn runtime(msg: impl fmt::Display) -> Self {
        Self::RuntimeError(msg.to_string())
    }

    /// Create a new missing argument error
    pub fn missing_argument(what: impl fmt::Display) -> Self {
        Self::MissingArgument(what.to_string())
    }

    /// Create a new argument type mismatch error
    pub fn argument_type(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self::ArgumentType {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
