//! Persisted plugin configuration
//!
//! Reads and writes configuration objects field by field, through the shape
//! the binary declares. Property names match fields ignoring ASCII case; a
//! property without a field is an error, so renamed fields never silently
//! lose data.
//!
//! Wire format per field kind:
//!
//! | Kind        | JSON                                  |
//! |-------------|---------------------------------------|
//! | integers    | number                                |
//! | floats      | number                                |
//! | `Decimal`   | string (numbers accepted on load)     |
//! | `char`      | one character string                  |
//! | `DateTime`  | RFC 3339 string                       |
//! | `Duration`  | humantime string, e.g. `"1m 30s"` (seconds accepted on load) |
//! | `Uuid`      | hyphenated string                     |

use crate::error::ConfigurationError;
use chrono::{DateTime, SecondsFormat, Utc};
use plughost_api::{
    ConfigValue, Configuration, ConfigurationDescriptor, FieldDescriptor, FieldKind,
};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Reads and writes configuration objects as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigurationLoader;

impl ConfigurationLoader {
    /// Build a configuration of the described type from `json`
    ///
    /// Blank input yields the default configuration.
    pub fn load(
        descriptor: &ConfigurationDescriptor,
        json: &str,
    ) -> Result<Box<dyn Configuration>, ConfigurationError> {
        check_supported(descriptor)?;

        let mut configuration = descriptor.create_default();
        if json.trim().is_empty() {
            return Ok(configuration);
        }

        let document: Value =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        let Value::Object(properties) = document else {
            return Err(ConfigurationError::NotAnObject);
        };

        for (name, value) in &properties {
            let field = descriptor
                .field(name)
                .ok_or_else(|| ConfigurationError::UnmappedProperty(name.clone()))?;

            let value = read_value(field, value)?;
            configuration
                .set(&field.name, value)
                .map_err(|_| invalid(field))?;
        }

        Ok(configuration)
    }

    /// Write every declared field of `configuration`, in declaration order
    pub fn save(configuration: &dyn Configuration) -> Result<String, ConfigurationError> {
        let descriptor = configuration.descriptor();
        check_supported(&descriptor)?;

        let mut properties = Map::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            let value = configuration
                .get(&field.name)
                .ok_or_else(|| invalid(field))?;
            properties.insert(field.name.clone(), write_value(field, value)?);
        }

        serde_json::to_string(&Value::Object(properties))
            .map_err(|e| ConfigurationError::Parse(e.to_string()))
    }
}

fn check_supported(descriptor: &ConfigurationDescriptor) -> Result<(), ConfigurationError> {
    match descriptor.fields.iter().find(|f| !f.kind.is_supported()) {
        Some(field) => Err(ConfigurationError::UnsupportedPropertyType {
            name: field.name.clone(),
            type_name: field.kind.to_string(),
        }),
        None => Ok(()),
    }
}

fn invalid(field: &FieldDescriptor) -> ConfigurationError {
    ConfigurationError::InvalidPropertyValue {
        name: field.name.clone(),
        expected: field.kind.to_string(),
    }
}

fn read_value(field: &FieldDescriptor, value: &Value) -> Result<ConfigValue, ConfigurationError> {
    let signed = || value.as_i64();
    let unsigned = || value.as_u64();

    let parsed = match &field.kind {
        FieldKind::Bool => value.as_bool().map(ConfigValue::Bool),
        FieldKind::I8 => signed().and_then(|n| i8::try_from(n).ok()).map(ConfigValue::I8),
        FieldKind::I16 => signed().and_then(|n| i16::try_from(n).ok()).map(ConfigValue::I16),
        FieldKind::I32 => signed().and_then(|n| i32::try_from(n).ok()).map(ConfigValue::I32),
        FieldKind::I64 => signed().map(ConfigValue::I64),
        FieldKind::U8 => unsigned().and_then(|n| u8::try_from(n).ok()).map(ConfigValue::U8),
        FieldKind::U16 => unsigned().and_then(|n| u16::try_from(n).ok()).map(ConfigValue::U16),
        FieldKind::U32 => unsigned().and_then(|n| u32::try_from(n).ok()).map(ConfigValue::U32),
        FieldKind::U64 => unsigned().map(ConfigValue::U64),
        FieldKind::F32 => value
            .as_f64()
            .map(|n| n as f32)
            .filter(|n| n.is_finite())
            .map(ConfigValue::F32),
        FieldKind::F64 => value.as_f64().map(ConfigValue::F64),
        FieldKind::Decimal => read_decimal(value).map(ConfigValue::Decimal),
        FieldKind::String => value.as_str().map(|s| ConfigValue::String(s.to_string())),
        FieldKind::Char => value.as_str().and_then(single_char).map(ConfigValue::Char),
        FieldKind::DateTime => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| ConfigValue::DateTime(at.with_timezone(&Utc))),
        FieldKind::Duration => read_duration(value).map(ConfigValue::Duration),
        FieldKind::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(ConfigValue::Uuid),
        FieldKind::Other(type_name) => {
            return Err(ConfigurationError::UnsupportedPropertyType {
                name: field.name.clone(),
                type_name: type_name.clone(),
            })
        }
    };

    parsed.ok_or_else(|| invalid(field))
}

fn write_value(field: &FieldDescriptor, value: ConfigValue) -> Result<Value, ConfigurationError> {
    let float = |n: f64| Number::from_f64(n).map(Value::Number).ok_or_else(|| invalid(field));

    Ok(match value {
        ConfigValue::Bool(b) => Value::Bool(b),
        ConfigValue::I8(n) => Value::from(n),
        ConfigValue::I16(n) => Value::from(n),
        ConfigValue::I32(n) => Value::from(n),
        ConfigValue::I64(n) => Value::from(n),
        ConfigValue::U8(n) => Value::from(n),
        ConfigValue::U16(n) => Value::from(n),
        ConfigValue::U32(n) => Value::from(n),
        ConfigValue::U64(n) => Value::from(n),
        ConfigValue::F32(n) => float(f64::from(n))?,
        ConfigValue::F64(n) => float(n)?,
        ConfigValue::Decimal(d) => Value::String(d.to_string()),
        ConfigValue::String(s) => Value::String(s),
        ConfigValue::Char(c) => Value::String(c.to_string()),
        ConfigValue::DateTime(at) => Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ConfigValue::Duration(d) => Value::String(humantime::format_duration(d).to_string()),
        ConfigValue::Uuid(id) => Value::String(id.hyphenated().to_string()),
    })
}

fn read_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn read_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::String(s) => humantime::parse_duration(s).ok(),
        Value::Number(n) => match n.as_u64() {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => n.as_f64().and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        },
        _ => None,
    }
}

fn single_char(text: &str) -> Option<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
