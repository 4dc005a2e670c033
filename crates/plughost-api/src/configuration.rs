//! Introspectable plugin configuration
//!
//! A configuration type is a plain value object whose shape is only known to
//! the binary that declares it. The host discovers that shape through
//! [`ConfigurationDescriptor`] and reads or writes fields one at a time through
//! [`Configuration::get`] and [`Configuration::set`].
//!
//! Most plugins declare their configuration with the [`configuration!`]
//! macro:
//!
//! ```rust
//! plughost_api::configuration! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct SensorConfig {
//!         pub interval_ms: u64,
//!         pub label: String,
//!     }
//! }
//! ```
//!
//! [`configuration!`]: crate::configuration!

use crate::error::{PluginError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::any::Any;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Shape of a single configuration field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// Fixed point decimal
    Decimal,
    /// `String`
    String,
    /// `char`
    Char,
    /// UTC timestamp
    DateTime,
    /// `std::time::Duration`
    Duration,
    /// UUID
    Uuid,
    /// Any other type; the host refuses to load or save it
    Other(String),
}

impl FieldKind {
    /// Whether the host knows how to read and write this kind
    pub fn is_supported(&self) -> bool {
        !matches!(self, FieldKind::Other(_))
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Bool => "bool",
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Decimal => "decimal",
            FieldKind::String => "string",
            FieldKind::Char => "char",
            FieldKind::DateTime => "datetime",
            FieldKind::Duration => "duration",
            FieldKind::Uuid => "uuid",
            FieldKind::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// `bool`
    Bool(bool),
    /// `i8`
    I8(i8),
    /// `i16`
    I16(i16),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `u8`
    U8(u8),
    /// `u16`
    U16(u16),
    /// `u32`
    U32(u32),
    /// `u64`
    U64(u64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
    /// Fixed point decimal
    Decimal(Decimal),
    /// `String`
    String(String),
    /// `char`
    Char(char),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// Duration
    Duration(Duration),
    /// UUID
    Uuid(Uuid),
}

impl ConfigValue {
    /// Kind of this value
    pub fn kind(&self) -> FieldKind {
        match self {
            ConfigValue::Bool(_) => FieldKind::Bool,
            ConfigValue::I8(_) => FieldKind::I8,
            ConfigValue::I16(_) => FieldKind::I16,
            ConfigValue::I32(_) => FieldKind::I32,
            ConfigValue::I64(_) => FieldKind::I64,
            ConfigValue::U8(_) => FieldKind::U8,
            ConfigValue::U16(_) => FieldKind::U16,
            ConfigValue::U32(_) => FieldKind::U32,
            ConfigValue::U64(_) => FieldKind::U64,
            ConfigValue::F32(_) => FieldKind::F32,
            ConfigValue::F64(_) => FieldKind::F64,
            ConfigValue::Decimal(_) => FieldKind::Decimal,
            ConfigValue::String(_) => FieldKind::String,
            ConfigValue::Char(_) => FieldKind::Char,
            ConfigValue::DateTime(_) => FieldKind::DateTime,
            ConfigValue::Duration(_) => FieldKind::Duration,
            ConfigValue::Uuid(_) => FieldKind::Uuid,
        }
    }
}

/// A declared configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as declared
    pub name: String,
    /// Field shape
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Create a field descriptor
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Shape of a configuration type, as declared by the binary
#[derive(Clone)]
pub struct ConfigurationDescriptor {
    /// Fully qualified type name
    pub type_name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
    create_default: fn() -> Box<dyn Configuration>,
}

impl fmt::Debug for ConfigurationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationDescriptor")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}

impl ConfigurationDescriptor {
    /// Create a descriptor
    pub fn new(
        type_name: impl Into<String>,
        fields: Vec<FieldDescriptor>,
        create_default: fn() -> Box<dyn Configuration>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
            create_default,
        }
    }

    /// Descriptor of a concrete configuration type
    pub fn of<C: ConfigurationType>() -> Self {
        C::configuration_descriptor()
    }

    /// Find a field by name, ignoring ASCII case
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// Produce an empty (default) instance of the configuration type
    pub fn create_default(&self) -> Box<dyn Configuration> {
        (self.create_default)()
    }
}

/// Object-safe access to a configuration value object
pub trait Configuration: fmt::Debug + Send + Sync + 'static {
    /// Shape of this configuration
    fn descriptor(&self) -> ConfigurationDescriptor;

    /// Read a field by its declared name
    fn get(&self, field: &str) -> Option<ConfigValue>;

    /// Write a field by its declared name
    fn set(&mut self, field: &str, value: ConfigValue) -> Result<()>;

    /// Borrow as [`Any`] for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Convert into [`Any`] for downcasting by value
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Concrete configuration types
pub trait ConfigurationType: Configuration + Default + Sized {
    /// Shape of this configuration type
    fn configuration_descriptor() -> ConfigurationDescriptor;
}

/// Boxed default instance of `C`, usable as a descriptor factory
pub fn default_boxed<C: ConfigurationType>() -> Box<dyn Configuration> {
    Box::new(C::default())
}

/// Types usable as configuration fields
pub trait ConfigField: Sized {
    /// Shape of this field type
    fn kind() -> FieldKind;

    /// Read the current value
    fn to_value(&self) -> ConfigValue;

    /// Convert a value of the matching kind back
    fn from_value(value: ConfigValue) -> Option<Self>;
}

macro_rules! impl_config_field {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ConfigField for $ty {
                fn kind() -> FieldKind {
                    FieldKind::$variant
                }

                fn to_value(&self) -> ConfigValue {
                    ConfigValue::$variant(self.clone())
                }

                fn from_value(value: ConfigValue) -> Option<Self> {
                    match value {
                        ConfigValue::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_config_field! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => String,
    char => Char,
    DateTime<Utc> => DateTime,
    Duration => Duration,
    Uuid => Uuid,
}

/// Error for a value that does not fit the declared field
pub fn field_type_error(field: &str, expected: &FieldKind, found: &ConfigValue) -> PluginError {
    PluginError::config(format!(
        "field `{field}` expects {expected}, got {}",
        found.kind()
    ))
}

/// Declare a configuration struct and implement [`Configuration`] for it
///
/// Every field type must implement [`ConfigField`]. Field names are the
/// declared identifiers; the host matches them case-insensitively.
#[macro_export]
macro_rules! configuration {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::configuration::ConfigurationType for $name {
            fn configuration_descriptor() -> $crate::configuration::ConfigurationDescriptor {
                $crate::configuration::ConfigurationDescriptor::new(
                    ::std::any::type_name::<$name>(),
                    ::std::vec![
                        $(
                            $crate::configuration::FieldDescriptor::new(
                                ::std::stringify!($field),
                                <$ty as $crate::configuration::ConfigField>::kind(),
                            ),
                        )*
                    ],
                    $crate::configuration::default_boxed::<$name>,
                )
            }
        }

        impl $crate::configuration::Configuration for $name {
            fn descriptor(&self) -> $crate::configuration::ConfigurationDescriptor {
                <$name as $crate::configuration::ConfigurationType>::configuration_descriptor()
            }

            fn get(&self, field: &str) -> ::std::option::Option<$crate::configuration::ConfigValue> {
                $(
                    if field == ::std::stringify!($field) {
                        return ::std::option::Option::Some(
                            $crate::configuration::ConfigField::to_value(&self.$field),
                        );
                    }
                )*
                ::std::option::Option::None
            }

            fn set(
                &mut self,
                field: &str,
                value: $crate::configuration::ConfigValue,
            ) -> $crate::error::Result<()> {
                $(
                    if field == ::std::stringify!($field) {
                        let expected = <$ty as $crate::configuration::ConfigField>::kind();
                        let error = $crate::configuration::field_type_error(field, &expected, &value);
                        self.$field = <$ty as $crate::configuration::ConfigField>::from_value(value)
                            .ok_or(error)?;
                        return ::std::result::Result::Ok(());
                    }
                )*
                ::std::result::Result::Err($crate::error::PluginError::config(
                    ::std::format!("unknown field `{}`", field),
                ))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
                self
            }
        }
    };
}
