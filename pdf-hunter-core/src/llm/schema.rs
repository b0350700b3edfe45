//! Structured-output contracts for LLM Gateway's `complete_structured`.
//!
//! Adapted from the signature/field-validation pattern the teacher crate
//! used for typed LLM call contracts: a type describes its own output shape
//! as a list of named, typed fields, and a validator checks a raw JSON value
//! against that shape before it is deserialized into the caller's struct.
//! `pdf-hunter-derive::Structured` generates the `StructuredSchema` impl;
//! this module owns the field vocabulary and the validator itself.

use serde_json::Value;
use thiserror::Error;

/// The primitive shapes a structured-output field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    /// A JSON array; element type is not tracked, only presence/absence.
    Array,
    /// A nested JSON object.
    Object,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_f64() || value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One field of a structured-output contract.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
        }
    }
}

/// Implemented by `#[derive(Structured)]` for every LLM structured-output
/// type (`FinalVerdict`, `TriageResult`, ...). Gives the gateway both a
/// name to force a single tool call against and a JSON Schema to hand the
/// model, plus the field list the gateway validates the raw response with
/// before `serde_json::from_value` ever runs.
pub trait StructuredSchema: serde::de::DeserializeOwned {
    /// Tool name the gateway forces a single call to (Anthropic
    /// `tool_choice: {type: "tool", name: ...}`).
    fn schema_name() -> &'static str;

    /// Field contract used by [`validate_fields`].
    fn fields() -> &'static [FieldSpec];

    /// JSON Schema handed to the provider as the tool's `input_schema`.
    fn json_schema() -> Value;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}` has wrong type: expected {expected}")]
    WrongType { field: String, expected: String },

    #[error("expected a JSON object at the top level")]
    NotAnObject,
}

/// Validate a raw JSON value against a structured-output contract's field
/// list. Called before deserialization so a schema violation surfaces as
/// `Error::LlmSchemaError` with a field-level message rather than an opaque
/// serde error.
pub fn validate_fields(value: &Value, fields: &[FieldSpec]) -> Result<(), ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    for field in fields {
        match obj.get(field.name) {
            Some(v) if !v.is_null() => {
                if !field.field_type.matches(v) {
                    return Err(ValidationError::WrongType {
                        field: field.name.to_string(),
                        expected: field.field_type.name().to_string(),
                    });
                }
            }
            Some(_) | None => {
                if field.required {
                    return Err(ValidationError::MissingField(field.name.to_string()));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::required("verdict", FieldType::String),
        FieldSpec::required("priority", FieldType::Integer),
        FieldSpec::optional("notes", FieldType::String),
    ];

    #[test]
    fn accepts_well_formed_object() {
        let v = json!({"verdict": "malicious", "priority": 8, "notes": "ok"});
        assert!(validate_fields(&v, FIELDS).is_ok());
    }

    #[test]
    fn missing_optional_field_is_fine() {
        let v = json!({"verdict": "benign", "priority": 1});
        assert!(validate_fields(&v, FIELDS).is_ok());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let v = json!({"priority": 1});
        assert_eq!(
            validate_fields(&v, FIELDS),
            Err(ValidationError::MissingField("verdict".to_string()))
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        let v = json!({"verdict": "benign", "priority": "high"});
        assert_eq!(
            validate_fields(&v, FIELDS),
            Err(ValidationError::WrongType {
                field: "priority".to_string(),
                expected: "integer".to_string(),
            })
        );
    }

    #[test]
    fn non_object_top_level_is_rejected() {
        let v = json!([1, 2, 3]);
        assert_eq!(validate_fields(&v, FIELDS), Err(ValidationError::NotAnObject));
    }
}
