//! Response schemas for agent calls
//!
//! Each agent call declares the JSON shape it expects back. Checks run
//! immediately after parsing; violations are returned as human-readable
//! strings so the client can feed them back to the agent verbatim.

use serde_json::Value;

/// Expected JSON type of a required field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Array,
    Object,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Bool => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Required-key and type checks for one agent response
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    name: &'static str,
    required: Vec<(&'static str, FieldType)>,
}

impl ResponseSchema {
    pub fn new(name: &'static str) -> Self {
        Self { name, required: Vec::new() }
    }

    /// Schema name, used in error context
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn require(mut self, key: &'static str, kind: FieldType) -> Self {
        self.required.push((key, kind));
        self
    }

    /// Check a parsed response. Empty result means the response conforms.
    pub fn check(&self, value: &Value) -> Vec<String> {
        let mut violations = Vec::new();

        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                violations.push("response must be a JSON object".to_string());
                return violations;
            }
        };

        for (key, kind) in &self.required {
            match obj.get(*key) {
                None => violations.push(format!("missing required key '{}'", key)),
                Some(v) if !kind.matches(v) => violations.push(format!(
                    "key '{}' must be a {}, got {}",
                    key,
                    kind.describe(),
                    json_type_name(v)
                )),
                Some(_) => {}
            }
        }

        violations
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
