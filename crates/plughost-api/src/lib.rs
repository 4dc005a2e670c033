//! # Plughost Plugin API
//!
//! This crate is the SDK for writing plugins hosted by the plughost runtime.
//!
//! A plugin binary is a `cdylib` that exports a [`PluginModule`] describing
//! the types it contains. The host picks the single type that implements
//! [`Plugin`], checks its constructor against the plugin contract, and builds
//! it with the arguments the constructor declares:
//!
//! - a [`Logger`] bound to the plugin's own type
//! - a configuration object declared with [`configuration!`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use plughost_api::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! plughost_api::configuration! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct TickConfig {
//!         pub interval: Duration,
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct Ticker {
//!     logger: Logger,
//!     config: TickConfig,
//! }
//!
//! #[async_trait]
//! impl Plugin for Ticker {
//!     async fn execute(&mut self, context: Arc<dyn ExecutionContext>) -> Result<(), PluginError> {
//!         while context.delay(self.config.interval).await {
//!             self.logger.info("tick");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn build(mut args: ConstructorArguments) -> Result<Box<dyn Plugin>, PluginError> {
//!     Ok(Box::new(Ticker {
//!         logger: args.logger()?,
//!         config: args.optional_configuration()?.unwrap_or_default(),
//!     }))
//! }
//!
//! fn module() -> PluginModule {
//!     PluginModule::new("ticker", "1.0.0").with_type(
//!         TypeDescriptor::plugin::<Ticker>().with_constructor(
//!             ConstructorDescriptor::new(build)
//!                 .logger_for::<Ticker>("logger")
//!                 .configuration::<TickConfig>("config"),
//!         ),
//!     )
//! }
//!
//! plughost_api::export_plugin_module!(module);
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod configuration;
pub mod descriptor;
pub mod error;
pub mod logger;
pub mod plugin;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types
pub use configuration::{
    ConfigField, ConfigValue, Configuration, ConfigurationDescriptor, ConfigurationType,
    FieldDescriptor, FieldKind,
};
pub use descriptor::{
    Argument, ConstructFn, ConstructorArguments, ConstructorDescriptor, ParameterDescriptor,
    ParameterKind, PluginModule, TypeDescriptor, ABI_VERSION,
};
pub use error::PluginError;
pub use logger::{LogLevel, LogSink, Logger};
pub use plugin::{ExecutionContext, Plugin};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::configuration::{Configuration, ConfigurationType};
    pub use crate::descriptor::{
        ConstructorArguments, ConstructorDescriptor, ParameterDescriptor, PluginModule,
        TypeDescriptor,
    };
    pub use crate::error::PluginError;
    pub use crate::logger::Logger;
    pub use crate::plugin::{ExecutionContext, Plugin};
    pub use async_trait::async_trait;
}
