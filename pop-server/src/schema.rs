//! Payload schema validation.
//!
//! The pipeline only sees the [`SchemaValidator`] trait; the JSON-Schema
//! documents themselves live outside this crate. [`StructuralValidator`]
//! is the built-in implementation: it checks the common `object`/`action`
//! header and, for payloads this server knows, the full typed shape.

use serde_json::Value;

use crate::error::HubError;
use crate::messagedata::ElectionData;

pub trait SchemaValidator: Send + Sync {
    /// Validate a decoded message payload.
    fn verify_data(&self, data: &[u8]) -> Result<(), HubError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl SchemaValidator for StructuralValidator {
    fn verify_data(&self, data: &[u8]) -> Result<(), HubError> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| HubError::SchemaViolation(format!("payload is not JSON: {e}")))?;
        let Value::Object(map) = &value else {
            return Err(HubError::SchemaViolation("payload must be a JSON object".into()));
        };

        let object = string_field(map, "object")?;
        let action = string_field(map, "action")?;

        if ElectionData::is_known(object, action) {
            ElectionData::decode(data).map_err(|e| match e {
                HubError::SchemaViolation(_) => e,
                other => HubError::SchemaViolation(other.to_string()),
            })?;
        }
        Ok(())
    }
}

fn string_field<'a>(
    map: &'a serde_json::Map<String, Value>,
    name: &str,
) -> Result<&'a str, HubError> {
    match map.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        _ => Err(HubError::SchemaViolation(format!(
            "missing or empty string field '{name}'"
        ))),
    }
}
