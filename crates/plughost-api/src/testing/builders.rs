//! Builders for plugin modules and type descriptors used in tests

use super::mocks::{
    BrokenConstructorPlugin, ConfiguredPlugin, CooperativePlugin, FailingPlugin, ImmediatePlugin,
    PanickingPlugin, SampleConfig, TickConfig,
};
use crate::descriptor::{ConstructorDescriptor, ParameterDescriptor, PluginModule, TypeDescriptor};

/// Builder for [`PluginModule`]
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    module: PluginModule,
}

impl ModuleBuilder {
    /// Start a module with the given name and version `1.0.0`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: PluginModule::new(name, "1.0.0"),
        }
    }

    /// Set the declared version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.module.version = version.into();
        self
    }

    /// Add a type
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.module.types.push(descriptor);
        self
    }

    /// Add a type that is not a plugin
    pub fn with_helper(self, name: impl Into<String>) -> Self {
        self.with_type(TypeDescriptor::new(name))
    }

    /// Finish the module
    pub fn build(self) -> PluginModule {
        self.module
    }
}

/// Ready-made type descriptors, valid and invalid
pub mod fixtures {
    use super::*;

    /// Logger plus [`TickConfig`]; runs until cancelled
    pub fn cooperative() -> TypeDescriptor {
        TypeDescriptor::plugin::<CooperativePlugin>().with_constructor(
            ConstructorDescriptor::new(CooperativePlugin::construct)
                .logger_for::<CooperativePlugin>("logger")
                .configuration::<TickConfig>("config"),
        )
    }

    /// No parameters; completes immediately
    pub fn immediate() -> TypeDescriptor {
        TypeDescriptor::plugin::<ImmediatePlugin>()
            .with_constructor(ConstructorDescriptor::new(ImmediatePlugin::construct))
    }

    /// Execution returns an error
    pub fn failing() -> TypeDescriptor {
        TypeDescriptor::plugin::<FailingPlugin>()
            .with_constructor(ConstructorDescriptor::new(FailingPlugin::construct))
    }

    /// Execution panics
    pub fn panicking() -> TypeDescriptor {
        TypeDescriptor::plugin::<PanickingPlugin>()
            .with_constructor(ConstructorDescriptor::new(PanickingPlugin::construct))
    }

    /// Requires a [`SampleConfig`]
    pub fn configured() -> TypeDescriptor {
        TypeDescriptor::plugin::<ConfiguredPlugin>().with_constructor(
            ConstructorDescriptor::new(ConfiguredPlugin::construct)
                .configuration::<SampleConfig>("config"),
        )
    }

    /// Constructor returns an error
    pub fn broken_constructor() -> TypeDescriptor {
        TypeDescriptor::plugin::<BrokenConstructorPlugin>().with_constructor(
            ConstructorDescriptor::new(BrokenConstructorPlugin::construct),
        )
    }

    /// Constructor panics
    pub fn panicking_constructor() -> TypeDescriptor {
        TypeDescriptor::plugin::<BrokenConstructorPlugin>().with_constructor(
            ConstructorDescriptor::new(BrokenConstructorPlugin::construct_panicking),
        )
    }

    /// Plugin type without any constructor
    pub fn without_constructor() -> TypeDescriptor {
        TypeDescriptor::plugin::<ImmediatePlugin>()
    }

    /// Plugin type with two constructors
    pub fn two_constructors() -> TypeDescriptor {
        immediate().with_constructor(
            ConstructorDescriptor::new(ImmediatePlugin::construct)
                .logger_for::<ImmediatePlugin>("logger"),
        )
    }

    /// Constructor with three parameters
    pub fn three_parameters() -> TypeDescriptor {
        TypeDescriptor::plugin::<CooperativePlugin>().with_constructor(
            ConstructorDescriptor::new(CooperativePlugin::construct)
                .logger_for::<CooperativePlugin>("logger")
                .configuration::<TickConfig>("config")
                .configuration::<SampleConfig>("extra"),
        )
    }

    /// Logger bound to a different type than the plugin
    pub fn foreign_logger() -> TypeDescriptor {
        TypeDescriptor::plugin::<CooperativePlugin>().with_constructor(
            ConstructorDescriptor::new(CooperativePlugin::construct)
                .logger_for::<ImmediatePlugin>("logger"),
        )
    }

    /// Constructor with a parameter the host cannot supply
    pub fn plain_parameter() -> TypeDescriptor {
        TypeDescriptor::plugin::<CooperativePlugin>().with_constructor(
            ConstructorDescriptor::new(CooperativePlugin::construct)
                .logger_for::<CooperativePlugin>("logger")
                .parameter(ParameterDescriptor::plain("port", "u16")),
        )
    }

    /// Two logger parameters
    pub fn duplicated_logger() -> TypeDescriptor {
        TypeDescriptor::plugin::<CooperativePlugin>().with_constructor(
            ConstructorDescriptor::new(CooperativePlugin::construct)
                .logger_for::<CooperativePlugin>("logger")
                .logger_for::<CooperativePlugin>("audit"),
        )
    }
}
