//! Configuration errors

use std::path::PathBuf;

/// Host configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file extension does not name a supported format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// The content could not be parsed
    #[error("Failed to parse {format}: {message}")]
    Parse {
        /// Format being parsed
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// A referenced environment variable is not set and has no default
    #[error("Environment variable '{0}' not set and no default provided")]
    MissingEnvVar(String),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    /// Create a new validation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create a new parse error
    pub fn parse(format: &'static str, msg: impl std::fmt::Display) -> Self {
        Self::Parse {
            format,
            message: msg.to_string(),
        }
    }
}
