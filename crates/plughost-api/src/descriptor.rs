//! Self-description of a plugin binary
//!
//! A binary cannot be reflected over at runtime, so it describes itself: the
//! exported [`PluginModule`] lists every type the binary offers to the host,
//! with the constructors of each type and the shape of their parameters.
//! The host validates that description before it calls any constructor.

use crate::configuration::{Configuration, ConfigurationDescriptor, ConfigurationType};
use crate::error::{PluginError, Result};
use crate::logger::Logger;
use crate::plugin::Plugin;
use std::fmt;

/// Constructor entry point of a plugin type
pub type ConstructFn = fn(ConstructorArguments) -> Result<Box<dyn Plugin>>;

/// Everything a binary exports to the host
#[derive(Debug, Clone)]
pub struct PluginModule {
    /// Module name, for diagnostics
    pub name: String,
    /// Declared version of the binary
    pub version: String,
    /// Every type the binary describes, plugin or not
    pub types: Vec<TypeDescriptor>,
}

impl PluginModule {
    /// Create an empty module
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            types: Vec::new(),
        }
    }

    /// Add a type to the module
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }
}

/// Description of one exported type
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// Fully qualified type name
    pub name: String,
    /// Whether the type implements [`Plugin`]
    pub implements_plugin: bool,
    /// Public constructors
    pub constructors: Vec<ConstructorDescriptor>,
}

impl TypeDescriptor {
    /// Describe a type that is not a plugin
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implements_plugin: false,
            constructors: Vec::new(),
        }
    }

    /// Describe the plugin type `P`
    pub fn plugin<P: Plugin + 'static>() -> Self {
        Self {
            name: std::any::type_name::<P>().to_string(),
            implements_plugin: true,
            constructors: Vec::new(),
        }
    }

    /// Mark the type as implementing [`Plugin`]
    pub fn implements_plugin(mut self) -> Self {
        self.implements_plugin = true;
        self
    }

    /// Add a constructor
    pub fn with_constructor(mut self, constructor: ConstructorDescriptor) -> Self {
        self.constructors.push(constructor);
        self
    }
}

/// One public constructor
#[derive(Clone)]
pub struct ConstructorDescriptor {
    /// Parameters in declaration order
    pub parameters: Vec<ParameterDescriptor>,
    /// Function building the object from its arguments
    pub construct: ConstructFn,
}

impl fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl ConstructorDescriptor {
    /// Constructor with no parameters yet
    pub fn new(construct: ConstructFn) -> Self {
        Self {
            parameters: Vec::new(),
            construct,
        }
    }

    /// Append a logger parameter bound to `T`
    pub fn logger_for<T: ?Sized>(self, name: impl Into<String>) -> Self {
        self.parameter(ParameterDescriptor {
            name: name.into(),
            kind: ParameterKind::Logger {
                type_argument: std::any::type_name::<T>().to_string(),
            },
        })
    }

    /// Append a configuration parameter of type `C`
    pub fn configuration<C: ConfigurationType>(self, name: impl Into<String>) -> Self {
        self.parameter(ParameterDescriptor {
            name: name.into(),
            kind: ParameterKind::Configuration(C::configuration_descriptor()),
        })
    }

    /// Append any parameter
    pub fn parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }
}

/// One constructor parameter
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    /// Parameter name
    pub name: String,
    /// Parameter shape
    pub kind: ParameterKind,
}

impl ParameterDescriptor {
    /// A parameter of a type the host knows nothing about
    pub fn plain(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::Plain {
                type_name: type_name.into(),
            },
        }
    }
}

/// Shape of a constructor parameter
#[derive(Debug, Clone)]
pub enum ParameterKind {
    /// Generic logger parameter, `Logger<T>`
    Logger {
        /// Name of `T`
        type_argument: String,
    },
    /// Annotated configuration parameter
    Configuration(ConfigurationDescriptor),
    /// Anything else
    Plain {
        /// Declared type name
        type_name: String,
    },
}

impl ParameterKind {
    /// Human readable type of the parameter
    pub fn type_name(&self) -> String {
        match self {
            ParameterKind::Logger { type_argument } => format!("Logger<{type_argument}>"),
            ParameterKind::Configuration(descriptor) => descriptor.type_name.clone(),
            ParameterKind::Plain { type_name } => type_name.clone(),
        }
    }
}

/// One resolved constructor argument
#[derive(Debug)]
pub enum Argument {
    /// Logger bound to the plugin type
    Logger(Logger),
    /// Configuration object, absent when the host has none
    Configuration(Option<Box<dyn Configuration>>),
}

/// Arguments handed to a [`ConstructFn`], in declaration order
#[derive(Debug, Default)]
pub struct ConstructorArguments {
    arguments: Vec<Argument>,
}

impl ConstructorArguments {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument
    pub fn push(&mut self, argument: Argument) {
        self.arguments.push(argument);
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Arguments in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter()
    }

    /// Take the logger argument
    pub fn logger(&mut self) -> Result<Logger> {
        let index = self
            .arguments
            .iter()
            .position(|argument| matches!(argument, Argument::Logger(_)))
            .ok_or_else(|| PluginError::missing_argument("logger"))?;

        match self.arguments.remove(index) {
            Argument::Logger(logger) => Ok(logger),
            Argument::Configuration(_) => Err(PluginError::missing_argument("logger")),
        }
    }

    /// Take the configuration argument, if the host supplied one
    pub fn optional_configuration<C: ConfigurationType>(&mut self) -> Result<Option<C>> {
        let Some(index) = self
            .arguments
            .iter()
            .position(|argument| matches!(argument, Argument::Configuration(_)))
        else {
            return Ok(None);
        };

        let Argument::Configuration(configuration) = self.arguments.remove(index) else {
            return Ok(None);
        };

        let Some(configuration) = configuration else {
            return Ok(None);
        };

        let found = configuration.descriptor().type_name;
        configuration
            .into_any()
            .downcast::<C>()
            .map(|boxed| Some(*boxed))
            .map_err(|_| PluginError::argument_type(std::any::type_name::<C>(), found))
    }

    /// Take the configuration argument
    pub fn configuration<C: ConfigurationType>(&mut self) -> Result<C> {
        self.optional_configuration::<C>()?
            .ok_or_else(|| PluginError::missing_argument(std::any::type_name::<C>()))
    }
}

/// Version of the binary interface between host and plugin binaries
///
/// Bumped whenever the layout of the types in this crate changes.
pub const ABI_VERSION: u32 = 1;

/// Symbol exporting the module description
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"plughost_module";

/// Symbol exporting the ABI version the binary was built against
pub const ABI_VERSION_SYMBOL: &[u8] = b"plughost_abi_version";

/// Signature of [`MODULE_ENTRY_SYMBOL`]
///
/// Returns a pointer produced by `Box::into_raw`, or null when building the
/// module panicked.
pub type ModuleEntryFn = unsafe extern "C" fn() -> *mut PluginModule;

/// Signature of [`ABI_VERSION_SYMBOL`]
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Export the entry points a plugin binary needs
///
/// ```rust,ignore
/// fn module() -> plughost_api::PluginModule {
///     plughost_api::PluginModule::new("sensor", env!("CARGO_PKG_VERSION"))
/// }
///
/// plughost_api::export_plugin_module!(module);
/// ```
#[macro_export]
macro_rules! export_plugin_module {
    ($build:path) => {
        #[no_mangle]
        pub extern "C" fn plughost_abi_version() -> u32 {
            $crate::descriptor::ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn plughost_module() -> *mut $crate::descriptor::PluginModule {
            match ::std::panic::catch_unwind(|| $build()) {
                Ok(module) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(module)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
