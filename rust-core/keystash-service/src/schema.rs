// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON schema validator for a practical subset of JSON Schema.
//
// Supported keywords: `type` (a name or a list of names), `const`, `enum`,
// `properties`, `required`, `additionalProperties` (boolean), `items`,
// `minLength`, `maxLength`, `pattern`, `minimum`, `maximum`, `minItems`,
// `maxItems`. Annotation keywords (`title`, `description`, `$schema`, ...) and
// any other keyword are ignored.
//
// The whole schema is compiled before the value is looked at, so a malformed
// schema is always reported as a `SchemaError`, whatever the value.

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::validation::{SchemaValidator, Validation};

/// Keywords of which a top-level schema must declare at least one.
const ROOT_CONSTRAINTS: [&str; 6] = ["type", "const", "enum", "properties", "required", "items"];

/// Validator for the supported JSON Schema subset.
///
/// The top-level schema must be an object declaring at least one of `type`,
/// `const`, `enum`, `properties`, `required` or `items`; nested schemas only
/// need to be objects.
///
/// # Example
///
/// ```rust
/// use keystash_service::{JsonSchemaValidator, SchemaValidator, Validation};
/// use serde_json::json;
///
/// let schema = json!({"type": "object", "required": ["id"]});
/// let verdict = JsonSchemaValidator.validate(&json!({"id": 7}), &schema).unwrap();
/// assert_eq!(verdict, Validation::Valid);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<Validation, SchemaError> {
        let compiled = CompiledSchema::compile(schema, true)?;
        let mut violations = Vec::new();
        compiled.check(value, "$", &mut violations);
        if violations.is_empty() {
            Ok(Validation::Valid)
        } else {
            Ok(Validation::Invalid(violations.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => JsonType::String,
            "number" => JsonType::Number,
            "integer" => JsonType::Integer,
            "boolean" => JsonType::Boolean,
            "object" => JsonType::Object,
            "array" => JsonType::Array,
            "null" => JsonType::Null,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Integer => "integer",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::Null => "null",
        }
    }

    fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => JsonType::String,
            Value::Number(n) if n.is_i64() || n.is_u64() => JsonType::Integer,
            Value::Number(_) => JsonType::Number,
            Value::Bool(_) => JsonType::Boolean,
            Value::Object(_) => JsonType::Object,
            Value::Array(_) => JsonType::Array,
            Value::Null => JsonType::Null,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Number, Value::Number(_)) => true,
            // 1.0 is an integer in JSON Schema.
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => JsonType::of(value) == self,
        }
    }
}

#[derive(Debug, Default)]
struct CompiledSchema {
    types: Option<Vec<JsonType>>,
    constant: Option<Value>,
    choices: Option<Vec<Value>>,
    properties: Vec<(String, CompiledSchema)>,
    required: Vec<String>,
    closed: bool,
    items: Option<Box<CompiledSchema>>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    #[cfg(feature = "regex")]
    pattern: Option<regex::Regex>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_items: Option<u64>,
    max_items: Option<u64>,
}

fn invalid(keyword: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidKeyword {
        keyword: keyword.to_string(),
        reason: reason.to_string(),
    }
}

fn count(schema: &Map<String, Value>, keyword: &str) -> Result<Option<u64>, SchemaError> {
    schema
        .get(keyword)
        .map(|v| v.as_u64().ok_or_else(|| invalid(keyword, "expected a non-negative integer")))
        .transpose()
}

fn bound(schema: &Map<String, Value>, keyword: &str) -> Result<Option<f64>, SchemaError> {
    schema
        .get(keyword)
        .map(|v| v.as_f64().ok_or_else(|| invalid(keyword, "expected a number")))
        .transpose()
}

impl CompiledSchema {
    fn compile(schema: &Value, root: bool) -> Result<Self, SchemaError> {
        let map = schema.as_object().ok_or(SchemaError::NotAnObject)?;
        if root && !ROOT_CONSTRAINTS.iter().any(|k| map.contains_key(*k)) {
            return Err(SchemaError::MissingConstraint);
        }

        let mut compiled = CompiledSchema {
            constant: map.get("const").cloned(),
            min_length: count(map, "minLength")?,
            max_length: count(map, "maxLength")?,
            minimum: bound(map, "minimum")?,
            maximum: bound(map, "maximum")?,
            min_items: count(map, "minItems")?,
            max_items: count(map, "maxItems")?,
            ..Default::default()
        };

        if let Some(types) = map.get("type") {
            let names: Vec<&Value> = match types {
                Value::Array(names) if !names.is_empty() => names.iter().collect(),
                Value::String(_) => vec![types],
                _ => return Err(invalid("type", "expected a type name or a non-empty list of names")),
            };
            let parsed = names
                .into_iter()
                .map(|name| {
                    name.as_str()
                        .and_then(JsonType::parse)
                        .ok_or_else(|| invalid("type", &format!("unknown type {name}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            compiled.types = Some(parsed);
        }

        if let Some(choices) = map.get("enum") {
            let choices = choices
                .as_array()
                .ok_or_else(|| invalid("enum", "expected an array"))?;
            compiled.choices = Some(choices.clone());
        }

        if let Some(properties) = map.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| invalid("properties", "expected an object"))?;
            for (name, sub) in properties {
                let sub = CompiledSchema::compile(sub, false).map_err(|err| match err {
                    SchemaError::NotAnObject => {
                        invalid("properties", &format!("schema for '{name}' is not an object"))
                    }
                    other => other,
                })?;
                compiled.properties.push((name.clone(), sub));
            }
        }

        if let Some(required) = map.get("required") {
            compiled.required = required
                .as_array()
                .and_then(|names| {
                    names
                        .iter()
                        .map(|n| n.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| invalid("required", "expected an array of strings"))?;
        }

        if let Some(additional) = map.get("additionalProperties") {
            compiled.closed = !additional
                .as_bool()
                .ok_or_else(|| invalid("additionalProperties", "only booleans are supported"))?;
        }

        if let Some(items) = map.get("items") {
            let items = CompiledSchema::compile(items, false).map_err(|err| match err {
                SchemaError::NotAnObject => invalid("items", "expected a schema object"),
                other => other,
            })?;
            compiled.items = Some(Box::new(items));
        }

        if let Some(pattern) = map.get("pattern") {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| invalid("pattern", "expected a string"))?;
            compiled.set_pattern(pattern)?;
        }

        Ok(compiled)
    }

    #[cfg(feature = "regex")]
    fn set_pattern(&mut self, pattern: &str) -> Result<(), SchemaError> {
        let regex = regex::Regex::new(pattern).map_err(|e| invalid("pattern", &e.to_string()))?;
        self.pattern = Some(regex);
        Ok(())
    }

    #[cfg(not(feature = "regex"))]
    fn set_pattern(&mut self, _pattern: &str) -> Result<(), SchemaError> {
        Err(SchemaError::Unsupported("pattern".to_string()))
    }

    fn check(&self, value: &Value, path: &str, violations: &mut Vec<String>) {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.matches(value)) {
                let expected: Vec<_> = types.iter().map(|t| t.name()).collect();
                violations.push(format!(
                    "{path}: expected {}, found {}",
                    expected.join(" or "),
                    JsonType::of(value).name()
                ));
                return;
            }
        }
        if let Some(constant) = &self.constant {
            if value != constant {
                violations.push(format!("{path}: expected constant {constant}"));
            }
        }
        if let Some(choices) = &self.choices {
            if !choices.contains(value) {
                violations.push(format!("{path}: value is not one of the allowed values"));
            }
        }

        match value {
            Value::String(text) => self.check_string(text, path, violations),
            Value::Number(number) => {
                if let Some(n) = number.as_f64() {
                    self.check_number(n, path, violations);
                }
            }
            Value::Array(items) => self.check_array(items, path, violations),
            Value::Object(members) => self.check_object(members, path, violations),
            Value::Bool(_) | Value::Null => {}
        }
    }

    fn check_string(&self, text: &str, path: &str, violations: &mut Vec<String>) {
        let length = text.chars().count() as u64;
        if let Some(min) = self.min_length {
            if length < min {
                violations.push(format!("{path}: shorter than {min} characters"));
            }
        }
        if let Some(max) = self.max_length {
            if length > max {
                violations.push(format!("{path}: longer than {max} characters"));
            }
        }
        self.check_pattern(text, path, violations);
    }

    #[cfg(feature = "regex")]
    fn check_pattern(&self, text: &str, path: &str, violations: &mut Vec<String>) {
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(text) {
                violations.push(format!("{path}: does not match pattern '{}'", pattern.as_str()));
            }
        }
    }

    #[cfg(not(feature = "regex"))]
    fn check_pattern(&self, _text: &str, _path: &str, _violations: &mut Vec<String>) {}

    fn check_number(&self, n: f64, path: &str, violations: &mut Vec<String>) {
        if let Some(min) = self.minimum {
            if n < min {
                violations.push(format!("{path}: {n} is less than the minimum {min}"));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                violations.push(format!("{path}: {n} is greater than the maximum {max}"));
            }
        }
    }

    fn check_array(&self, items: &[Value], path: &str, violations: &mut Vec<String>) {
        let len = items.len() as u64;
        if let Some(min) = self.min_items {
            if len < min {
                violations.push(format!("{path}: fewer than {min} items"));
            }
        }
        if let Some(max) = self.max_items {
            if len > max {
                violations.push(format!("{path}: more than {max} items"));
            }
        }
        if let Some(schema) = &self.items {
            for (index, item) in items.iter().enumerate() {
                schema.check(item, &format!("{path}[{index}]"), violations);
            }
        }
    }

    fn check_object(&self, members: &Map<String, Value>, path: &str, violations: &mut Vec<String>) {
        for name in &self.required {
            if !members.contains_key(name) {
                violations.push(format!("{path}: missing required property '{name}'"));
            }
        }
        for (name, schema) in &self.properties {
            if let Some(member) = members.get(name) {
                schema.check(member, &format!("{path}.{name}"), violations);
            }
        }
        if self.closed {
            for name in members.keys() {
                if !self.properties.iter().any(|(known, _)| known == name) {
                    violations.push(format!("{path}: unexpected property '{name}'"));
                }
            }
        }
    }
}
