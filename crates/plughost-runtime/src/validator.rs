//! Plugin contract validation
//!
//! A plugin type must declare exactly one constructor taking, in any order:
//!
//! - nothing at all,
//! - a logger bound to the plugin type itself,
//! - a configuration object,
//! - or both.
//!
//! Anything else is rejected with an error naming the offending count or type.

use crate::error::ContractError;
use plughost_api::{ConfigurationDescriptor, ParameterKind, TypeDescriptor};
use serde::Serialize;

/// Maximum number of constructor parameters
pub const MAX_PARAMETERS: usize = 2;

/// Constructor shape of a valid plugin type
#[derive(Debug, Clone)]
pub struct ContractShape {
    /// The constructor takes a logger
    pub has_logger: bool,
    /// The constructor takes a configuration
    pub has_configuration: bool,
    /// Declared configuration type
    pub configuration: Option<ConfigurationDescriptor>,
}

/// What the host knows about the plugin type of a binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginTypeInfo {
    /// Plugin type name
    pub type_name: String,
    /// The constructor takes a logger
    pub has_logger: bool,
    /// The constructor takes a configuration
    pub has_configuration: bool,
    /// Version declared by the binary
    pub version: String,
}

/// Checks types against the plugin contract
#[derive(Debug, Default, Clone, Copy)]
pub struct ContractValidator;

impl ContractValidator {
    /// Predicate selecting plugin candidates from a type table
    pub fn is_plugin_candidate(descriptor: &TypeDescriptor) -> bool {
        descriptor.implements_plugin
    }

    /// Pick the single plugin type among `candidates`
    pub fn select_plugin_type(
        mut candidates: Vec<TypeDescriptor>,
    ) -> Result<TypeDescriptor, ContractError> {
        match candidates.len() {
            0 => Err(ContractError::PluginTypeNotFound),
            1 => Ok(candidates.remove(0)),
            n => Err(ContractError::PluginTypesFound(n)),
        }
    }

    /// Validate the constructor of `descriptor`
    pub fn validate(descriptor: &TypeDescriptor) -> Result<ContractShape, ContractError> {
        let [constructor] = descriptor.constructors.as_slice() else {
            return Err(ContractError::InvalidConstructorCount(
                descriptor.constructors.len(),
            ));
        };

        let parameters = &constructor.parameters;
        if parameters.len() > MAX_PARAMETERS {
            return Err(ContractError::InvalidParameterCount(parameters.len()));
        }

        let mut shape = ContractShape {
            has_logger: false,
            has_configuration: false,
            configuration: None,
        };

        for parameter in parameters {
            match &parameter.kind {
                ParameterKind::Logger { type_argument } => {
                    if type_argument != &descriptor.name {
                        return Err(ContractError::InvalidLoggerTypeParameter(
                            type_argument.clone(),
                        ));
                    }
                    if shape.has_logger {
                        return Err(ContractError::InvalidConstructorParameters(format!(
                            "logger parameter `{}` is declared twice",
                            parameter.name
                        )));
                    }
                    shape.has_logger = true;
                }
                ParameterKind::Configuration(configuration) => {
                    if shape.has_configuration {
                        return Err(ContractError::InvalidConstructorParameters(format!(
                            "configuration parameter `{}` is declared twice",
                            parameter.name
                        )));
                    }
                    shape.has_configuration = true;
                    shape.configuration = Some(configuration.clone());
                }
                ParameterKind::Plain { type_name } => {
                    return Err(ContractError::InvalidConstructorParameters(format!(
                        "parameter `{}` of type `{type_name}` is neither a logger nor a configuration",
                        parameter.name
                    )));
                }
            }
        }

        Ok(shape)
    }

    /// Describe a validated plugin type
    pub fn describe(
        descriptor: &TypeDescriptor,
        shape: &ContractShape,
        version: &str,
    ) -> PluginTypeInfo {
        PluginTypeInfo {
            type_name: descriptor.name.clone(),
            has_logger: shape.has_logger,
            has_configuration: shape.has_configuration,
            version: version.to_string(),
        }
    }
}
