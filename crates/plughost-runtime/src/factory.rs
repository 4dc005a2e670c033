//! Plugin construction
//!
//! The factory resolves constructor arguments from a small rule table and
//! calls the constructor declared by the binary:
//!
//! | Parameter       | Argument                                     |
//! |-----------------|----------------------------------------------|
//! | `Logger<T>`     | logger from the [`LoggerFactory`], category `T` |
//! | configuration   | the supplied configuration, or none          |

use crate::error::{HostError, Result};
use crate::validator::ContractValidator;
use plughost_api::{
    Argument, Configuration, ConstructorArguments, LogLevel, LogSink, Logger, ParameterKind,
    Plugin, TypeDescriptor,
};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Target of every record written by plugin loggers
pub const PLUGIN_LOG_TARGET: &str = "plughost::plugin";

/// Creates loggers handed to plugin constructors
pub trait LoggerFactory: Send + Sync + fmt::Debug {
    /// Logger whose records are attributed to `category`
    fn create_logger(&self, category: &str) -> Logger;
}

/// Writes plugin log records to the host's `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, category: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => {
                tracing::trace!(target: PLUGIN_LOG_TARGET, category = %category, "{message}")
            }
            LogLevel::Debug => {
                tracing::debug!(target: PLUGIN_LOG_TARGET, category = %category, "{message}")
            }
            LogLevel::Info => {
                tracing::info!(target: PLUGIN_LOG_TARGET, category = %category, "{message}")
            }
            LogLevel::Warn => {
                tracing::warn!(target: PLUGIN_LOG_TARGET, category = %category, "{message}")
            }
            LogLevel::Error => {
                tracing::error!(target: PLUGIN_LOG_TARGET, category = %category, "{message}")
            }
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Trace => tracing::enabled!(target: PLUGIN_LOG_TARGET, tracing::Level::TRACE),
            LogLevel::Debug => tracing::enabled!(target: PLUGIN_LOG_TARGET, tracing::Level::DEBUG),
            LogLevel::Info => tracing::enabled!(target: PLUGIN_LOG_TARGET, tracing::Level::INFO),
            LogLevel::Warn => tracing::enabled!(target: PLUGIN_LOG_TARGET, tracing::Level::WARN),
            LogLevel::Error => tracing::enabled!(target: PLUGIN_LOG_TARGET, tracing::Level::ERROR),
        }
    }
}

/// Default [`LoggerFactory`], backed by [`TracingLogSink`]
#[derive(Debug, Clone)]
pub struct TracingLoggerFactory {
    sink: Arc<dyn LogSink>,
}

impl Default for TracingLoggerFactory {
    fn default() -> Self {
        Self {
            sink: Arc::new(TracingLogSink),
        }
    }
}

impl TracingLoggerFactory {
    /// Create a new tracing logger factory
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoggerFactory for TracingLoggerFactory {
    fn create_logger(&self, category: &str) -> Logger {
        Logger::new(category, self.sink.clone())
    }
}

/// Builds plugin objects from validated types
#[derive(Debug, Clone)]
pub struct PluginFactory {
    logger_factory: Arc<dyn LoggerFactory>,
}

impl Default for PluginFactory {
    fn default() -> Self {
        Self::new(Arc::new(TracingLoggerFactory::new()))
    }
}

impl PluginFactory {
    /// Create a factory using `logger_factory` for logger parameters
    pub fn new(logger_factory: Arc<dyn LoggerFactory>) -> Self {
        Self { logger_factory }
    }

    /// Construct the plugin described by `descriptor`
    ///
    /// `configuration` is handed to the configuration parameter; it is
    /// dropped with a warning when the constructor takes none.
    pub fn create_instance(
        &self,
        descriptor: &TypeDescriptor,
        configuration: Option<Box<dyn Configuration>>,
    ) -> Result<Box<dyn Plugin>> {
        ContractValidator::validate(descriptor)?;
        let constructor = descriptor
            .constructors
            .first()
            .ok_or_else(|| HostError::activation("plugin type has no constructor"))?;

        let mut configuration = configuration;
        let mut args = ConstructorArguments::new();

        for parameter in &constructor.parameters {
            match &parameter.kind {
                ParameterKind::Logger { .. } => {
                    args.push(Argument::Logger(
                        self.logger_factory.create_logger(&descriptor.name),
                    ));
                }
                ParameterKind::Configuration(declared) => {
                    if let Some(supplied) = &configuration {
                        let supplied_type = supplied.descriptor().type_name;
                        if supplied_type != declared.type_name {
                            return Err(HostError::activation(format!(
                                "parameter `{}` expects configuration `{}`, got `{supplied_type}`",
                                parameter.name, declared.type_name
                            )));
                        }
                    }
                    args.push(Argument::Configuration(configuration.take()));
                }
                ParameterKind::Plain { type_name } => {
                    return Err(HostError::activation(format!(
                        "no argument available for parameter `{}` of type `{type_name}`",
                        parameter.name
                    )));
                }
            }
        }

        if configuration.is_some() {
            warn!(
                plugin = %descriptor.name,
                "Plugin declares no configuration parameter; ignoring supplied configuration"
            );
        }

        let construct = constructor.construct;
        match catch_unwind(AssertUnwindSafe(|| construct(args))) {
            Ok(Ok(plugin)) => {
                debug!(plugin = %descriptor.name, "Plugin constructed");
                Ok(plugin)
            }
            Ok(Err(e)) => Err(HostError::activation(e)),
            Err(payload) => Err(HostError::activation(format!(
                "constructor panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    /// Default instance of the configuration type `descriptor` declares
    pub fn create_configuration(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Option<Box<dyn Configuration>> {
        descriptor
            .constructors
            .first()?
            .parameters
            .iter()
            .find_map(|parameter| match &parameter.kind {
                ParameterKind::Configuration(configuration) => Some(configuration.create_default()),
                _ => None,
            })
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
