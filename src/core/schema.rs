//! JSON Schema compilation and instance validation.
//!
//! Draft-04 is the contract; the compiler auto-detects `$schema` and
//! accepts later drafts, which are supersets for the constructs used here.
//! Validation is deterministic and side-effect-free.

use jsonschema::JSONSchema;
use serde_json::Value;

use super::error::CoreError;

/// A compiled schema ready to validate annotation instances.
#[derive(Debug)]
pub struct CompiledSchema {
    compiled: JSONSchema,
}

impl CompiledSchema {
    /// Parse and compile schema bytes. Fails with a `"schema"` validation
    /// error when the bytes are not JSON or not a well-formed JSON Schema.
    pub fn compile(bytes: &[u8]) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|err| {
            CoreError::validation("schema", format!("schema bytes are not JSON: {err}"))
        })?;
        let compiled = JSONSchema::compile(&value).map_err(|err| {
            CoreError::validation("schema", format!("not a valid JSON Schema: {err}"))
        })?;
        Ok(Self { compiled })
    }

    /// Validate one instance document against this schema.
    pub fn check(&self, instance_bytes: &[u8]) -> Result<(), CoreError> {
        let instance: Value = serde_json::from_slice(instance_bytes).map_err(|err| {
            CoreError::validation("schema", format!("annotation bytes are not JSON: {err}"))
        })?;
        let detail = match self.compiled.validate(&instance) {
            Ok(()) => return Ok(()),
            Err(mut errors) => errors
                .next()
                .map(|err| err.to_string())
                .unwrap_or_else(|| "instance does not match schema".to_string()),
        };
        Err(CoreError::validation("schema", detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABEL_SCHEMA: &[u8] = br#"{
        "type": "object",
        "properties": { "label": { "type": "string" } },
        "required": ["label"]
    }"#;

    #[test]
    fn compile_accepts_draft_schema() {
        assert!(CompiledSchema::compile(LABEL_SCHEMA).is_ok());
    }

    #[test]
    fn compile_rejects_non_json_and_bad_schema() {
        assert!(CompiledSchema::compile(b"not json").is_err());
        let err = CompiledSchema::compile(br#"{"type": 12}"#).unwrap_err();
        assert_eq!(err.reason(), Some("schema"));
    }

    #[test]
    fn check_validates_instances() {
        let schema = CompiledSchema::compile(LABEL_SCHEMA).unwrap();
        assert!(schema.check(br#"{"label":"bird"}"#).is_ok());

        let err = schema.check(br#"{"label":42}"#).unwrap_err();
        assert_eq!(err.reason(), Some("schema"));

        let err = schema.check(br#"{}"#).unwrap_err();
        assert_eq!(err.reason(), Some("schema"));
    }
}
