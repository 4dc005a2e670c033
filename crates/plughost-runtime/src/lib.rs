//! # Plughost Runtime
//!
//! Loads plugin binaries into isolated contexts and runs the plugins they
//! export as managed instances.
//!
//! ## Features
//!
//! - **Load Contexts**: One binary per context, never shared between instances
//! - **Unload Verification**: Confirms a released binary is actually reclaimed
//! - **Contract Validation**: Exactly one plugin type with a supported constructor
//! - **Configuration**: Persisted JSON mapped onto typed configuration objects
//! - **Instance Host**: Create, start, stop and remove instances concurrently
//!
//! ## Example
//!
//! ```rust,no_run
//! use plughost_runtime::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<()> {
//! let host = InstanceHost::new(HostConfig::default())?;
//!
//! host.create_instance(1, "heartbeat", "plugins/libsensor_heartbeat.so")?;
//! host.wait_for_state(1, InstanceState::PlugInLoaded, Duration::from_secs(5))
//!     .await?;
//! host.start_instance(1).await?;
//!
//! host.stop_instance(1)?;
//! host.wait_for_state(1, InstanceState::Complete, Duration::from_secs(5))
//!     .await?;
//! host.remove_instance(1)?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod config_loader;
pub mod context;
pub mod error;
pub mod events;
pub mod factory;
pub mod host;
pub mod instance;
pub mod load_context;
pub mod loader;
mod pipeline;
pub mod unload;
pub mod validator;

pub use config_loader::ConfigurationLoader;
pub use context::TaskContext;
pub use error::{ConfigurationError, ContractError, HostError, LoadError, Result};
pub use events::{EventBus, StateChange};
pub use factory::{LoggerFactory, PluginFactory, TracingLogSink, TracingLoggerFactory};
pub use host::{HostBuilder, HostStats, InstanceHost};
pub use instance::{Instance, InstanceQuery, InstanceRequest, InstanceState};
pub use load_context::{LoadContext, LoadContextState};
pub use loader::{BinaryLoader, LoadedBinary, NativeLoader, StaticLoader, StaticModuleFn};
pub use unload::{UnloadHandle, UnloadVerifier};
pub use validator::{ContractShape, ContractValidator, PluginTypeInfo};

pub use plughost_config::HostConfig;

// Re-export plugin API types for convenience
pub use plughost_api::{
    ExecutionContext, Logger, Plugin, PluginError, PluginModule, TypeDescriptor, ABI_VERSION,
};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::error::{HostError, Result};
    pub use crate::host::{HostBuilder, InstanceHost};
    pub use crate::instance::{Instance, InstanceQuery, InstanceRequest, InstanceState};
    pub use plughost_config::HostConfig;
}
