//! Agent config schema and merge policy
//!
//! An agent declares its config as an ordered list of typed fields with
//! defaults. The hub stores the merged blob under the agent's `meta.config`.
//!
//! Precedence:
//! - `config`: stored server values win over the client's local defaults.
//! - `config-update`: the delta wins over the stored base.

use crate::error::SchemaError;
use crate::types::Data;
use serde_json::Value;

/// Key under which an agent's config blob lives in its record meta
pub const CONFIG_META_KEY: &str = "config";

/// Declared type of a config field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::List => "list",
            FieldType::Object => "object",
        }
    }

    /// Integers are accepted where floats are declared
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::List => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) if n.is_f64() => "float".to_string(),
        Value::Number(_) => "integer".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "list".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// One declared config field
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigField {
    pub name: String,
    pub field_type: FieldType,
    pub default: Value,
}

/// Ordered list of config fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    fields: Vec<ConfigField>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType, default: impl Into<Value>) -> Self {
        self.fields.push(ConfigField {
            name: name.into(),
            field_type,
            default: default.into(),
        });
        self
    }

    pub fn fields(&self) -> &[ConfigField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Local defaults sent to the hub on `config`
    pub fn defaults(&self) -> Data {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect()
    }

    /// Check the schema itself: unique names and well-typed defaults
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        self.validate(&self.defaults())
    }

    /// Validate declared fields present in `values`. Undeclared keys pass
    /// through untouched since other writers may share the blob.
    pub fn validate(&self, values: &Data) -> Result<(), SchemaError> {
        for field in &self.fields {
            if let Some(value) = values.get(&field.name) {
                if !field.field_type.accepts(value) {
                    return Err(SchemaError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type.as_str(),
                        found: describe(value),
                    });
                }
            }
        }
        Ok(())
    }
}

/// `config`: stored server values over client defaults
pub fn merge_server_over_client(client_defaults: &Data, stored: &Data) -> Data {
    let mut merged = client_defaults.clone();
    for (key, value) in stored {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// `config-update`: delta over the stored base
pub fn apply_delta(base: &Data, delta: &Data) -> Data {
    let mut merged = base.clone();
    for (key, value) in delta {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Extract the config blob from an agent record's meta
pub fn stored_config(meta: &Data) -> Data {
    meta.get(CONFIG_META_KEY)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}
