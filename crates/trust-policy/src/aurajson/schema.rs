// schema.rs - Minimal input schema checks.
//
// Supports a small subset of JSON Schema on the top-level input object:
//
//   { "required": ["field", ..],
//     "properties": { "field": { "type": "string|number|boolean|object|array" } } }
//
// Unknown type names accept any value. Violations are collected, not
// short-circuited, so the trace lists every problem at once.

use serde_json::Value;

use crate::error::PolicyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl JsonType {
    fn parse(name: &str) -> Option<JsonType> {
        match name {
            "string" => Some(JsonType::String),
            "number" => Some(JsonType::Number),
            "boolean" => Some(JsonType::Boolean),
            "object" => Some(JsonType::Object),
            "array" => Some(JsonType::Array),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
        }
    }
}

/// Compiled input schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    required: Vec<String>,
    properties: Vec<(String, JsonType)>,
}

impl InputSchema {
    /// Parse the optional `schema` member of a policy body.
    ///
    /// Returns None when the schema is absent or empty.
    pub fn parse(schema: Option<&Value>) -> Result<Option<InputSchema>, PolicyError> {
        let map = match schema {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(map)) if map.is_empty() => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(PolicyError::InvalidBody(
                    "'schema' must be an object".to_string(),
                ))
            }
        };

        let mut parsed = InputSchema::default();
        if let Some(required) = map.get("required") {
            let items = required.as_array().ok_or_else(|| {
                PolicyError::InvalidBody("'schema.required' must be an array".to_string())
            })?;
            parsed.required = items
                .iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(props) = map.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                PolicyError::InvalidBody("'schema.properties' must be an object".to_string())
            })?;
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for name in names {
                let ty = props[name.as_str()]
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(JsonType::parse);
                if let Some(ty) = ty {
                    parsed.properties.push((name.clone(), ty));
                }
            }
        }
        Ok(Some(parsed))
    }

    /// Check an input document, returning every violation found.
    pub fn validate(&self, input: &Value) -> Vec<String> {
        let Some(map) = input.as_object() else {
            return vec!["input is not valid JSON object".to_string()];
        };
        let mut errors = Vec::new();
        for name in &self.required {
            if !map.contains_key(name) {
                errors.push(format!("missing required field '{}'", name));
            }
        }
        for (name, ty) in &self.properties {
            if let Some(value) = map.get(name) {
                if !ty.accepts(value) {
                    errors.push(format!("field '{}' expected type {}", name, ty.name()));
                }
            }
        }
        errors
    }
}
