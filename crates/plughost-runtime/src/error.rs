//! Runtime error types

use crate::instance::InstanceState;
use std::fmt;
use std::path::PathBuf;

/// Failure to load a plugin binary
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The binary file does not exist
    #[error("Binary not found: {}", .0.display())]
    BinaryNotFound(PathBuf),

    /// The operating system refused to load the binary
    #[error("Failed to load {}: {message}", path.display())]
    Load {
        /// Binary being loaded
        path: PathBuf,
        /// Loader message
        message: String,
    },

    /// A required entry point is missing
    #[error("Symbol `{symbol}` not found in {}", path.display())]
    SymbolNotFound {
        /// Binary being loaded
        path: PathBuf,
        /// Missing symbol
        symbol: String,
    },

    /// The binary was built against another version of the plugin ABI
    #[error("ABI version mismatch: host expects {expected}, binary exports {found}")]
    AbiMismatch {
        /// Version of the host
        expected: u32,
        /// Version exported by the binary
        found: u32,
    },

    /// The entry point failed to produce a module description
    #[error("Entry point of {} returned no module", .0.display())]
    NullModule(PathBuf),

    /// The binary could not be copied to the shadow directory
    #[error("Failed to shadow copy {}: {source}", path.display())]
    ShadowCopy {
        /// Binary being copied
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The load context already holds a binary
    #[error("Load context {0} has already been used")]
    ContextReused(String),
}

/// A binary does not satisfy the plugin contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    /// A plugin type needs exactly one constructor
    #[error("Plugin type must declare exactly one constructor, found {0}")]
    InvalidConstructorCount(usize),

    /// A constructor takes at most a logger and a configuration
    #[error("Plugin constructor accepts at most 2 parameters, found {0}")]
    InvalidParameterCount(usize),

    /// The logger parameter is bound to another type
    #[error("Logger parameter must be bound to the plugin type, found Logger<{0}>")]
    InvalidLoggerTypeParameter(String),

    /// A parameter is neither a logger nor a configuration, or is repeated
    #[error("Invalid constructor parameters: {0}")]
    InvalidConstructorParameters(String),

    /// No type implements the plugin contract
    #[error("No plugin type found in binary")]
    PluginTypeNotFound,

    /// More than one type implements the plugin contract
    #[error("Expected a single plugin type, found {0}")]
    PluginTypesFound(usize),
}

/// Failure to read or write a plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The text is not valid JSON
    #[error("Configuration is not valid JSON: {0}")]
    Parse(String),

    /// The document is not a JSON object
    #[error("Configuration must be a JSON object")]
    NotAnObject,

    /// A property has no matching field
    #[error("Property `{0}` does not match any configuration field")]
    UnmappedProperty(String),

    /// A field has a type the loader cannot handle
    #[error("Field `{name}` has unsupported type `{type_name}`")]
    UnsupportedPropertyType {
        /// Field name
        name: String,
        /// Declared field type
        type_name: String,
    },

    /// A property value does not fit its field
    #[error("Invalid value for `{name}`: expected {expected}")]
    InvalidPropertyValue {
        /// Field name
        name: String,
        /// Expected shape
        expected: String,
    },
}

/// Error returned by the instance host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Instance ids must be positive
    #[error("Invalid instance id: {0}")]
    InvalidId(i64),

    /// Instance names must not be empty
    #[error("Instance name cannot be empty")]
    InvalidName,

    /// Binary paths must not be empty
    #[error("Binary path cannot be empty")]
    InvalidPath,

    /// The id is already registered
    #[error("Instance already exists: {0}")]
    InstanceExists(i64),

    /// The name is already registered
    #[error("Instance name already in use: {0}")]
    InstanceNameExists(String),

    /// The running instance ceiling is reached
    #[error("Maximum number of running instances reached ({0})")]
    MaxInstancesRunning(usize),

    /// The id is not registered
    #[error("Instance not found: {0}")]
    InstanceNotFound(i64),

    /// The instance is activating or active
    #[error("Instance is running: {0}")]
    InstanceRunning(i64),

    /// The instance is in a state that cannot be started
    #[error("Instance {id} cannot be started from state {state}")]
    InstanceNotStartable {
        /// Instance id
        id: i64,
        /// Current state
        state: InstanceState,
    },

    /// Loading the binary failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The binary violates the plugin contract
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// The persisted configuration could not be loaded
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Constructing the plugin failed
    #[error("Plugin activation failed: {0}")]
    PluginActivationFailed(String),

    /// The plugin returned an error from its execution
    ///
    /// Only the rendered message is kept; the plugin's error value is
    /// dropped while its binary is still mapped.
    #[error("Plugin execution failed: {0}")]
    ExecutionFailed(String),

    /// The plugin panicked during execution
    #[error("Plugin execution panicked: {0}")]
    ExecutionPanicked(String),

    /// A wait did not complete in time
    #[error("Timed out waiting for instance {id} (state {state})")]
    Timeout {
        /// Instance id
        id: i64,
        /// State when the wait gave up
        state: InstanceState,
    },

    /// An instance reached a state the caller was not waiting for
    #[error("Instance {id} reached {actual} while waiting for {expected}")]
    UnexpectedState {
        /// Instance id
        id: i64,
        /// State waited for
        expected: InstanceState,
        /// State reached
        actual: InstanceState,
    },

    /// Invalid host configuration
    #[error(transparent)]
    Config(#[from] plughost_config::ConfigError),

    /// The host was built outside of a Tokio runtime
    #[error("No Tokio runtime available to drive the host")]
    NoRuntime,
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;

impl HostError {
    /// Create a new activation failure
    pub fn activation(msg: impl fmt::Display) -> Self {
        Self::PluginActivationFailed(msg.to_string())
    }

    /// Create a new execution failure
    pub fn execution(msg: impl fmt::Display) -> Self {
        Self::ExecutionFailed(msg.to_string())
    }

    /// Rejected caller input
    pub fn is_input_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_) | Self::InvalidName | Self::InvalidPath
        )
    }

    /// Conflict with the current registry state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::InstanceExists(_)
                | Self::InstanceNameExists(_)
                | Self::InstanceRunning(_)
                | Self::MaxInstancesRunning(_)
                | Self::InstanceNotStartable { .. }
        )
    }

    /// Unknown instance or missing binary
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotFound(_) | Self::Load(LoadError::BinaryNotFound(_))
        )
    }

    /// The binary violates the plugin contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}
