//! JSON documents checked against a JSON Schema subset.
//!
//! Covers `type`, `enum`, `const`, string length, `pattern` and `format`,
//! numeric bounds and `multipleOf`, array size, `uniqueItems`, `items` and
//! `prefixItems`, and object `required`, `properties`,
//! `additionalProperties` and size bounds. `$ref` is not resolved. A
//! violated constraint fails the claim that the document conforms. A
//! `format` mismatch and a property rejected by `additionalProperties:
//! false` are only warnings; unknown formats are ignored.

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactKind};
use crate::engine::{EngineFault, VerificationEngine};
use crate::engines::sql::issues_verdict;
use crate::format::rejected;
use crate::result::{EngineStatus, EngineVerdict, Issue, Severity};

const FORMATS: &[(&str, &str)] = &[
    ("email", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"),
    ("uri", r"^https?://"),
    ("date", r"^\d{4}-\d{2}-\d{2}$"),
    ("date-time", r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}"),
    ("uuid", r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"),
    ("ipv4", r"^(\d{1,3}\.){3}\d{1,3}$"),
];

/// Compiled size cap for a schema-supplied `pattern`.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Error)]
enum SchemaError {
    #[error("{path}: a schema must be an object or a boolean")]
    NotASchema { path: String },
    #[error("{path}: invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        path: String,
        pattern: String,
        source: regex::Error,
    },
}

pub struct JsonSchemaEngine {
    formats: Vec<(&'static str, Regex)>,
    max_input_bytes: usize,
}

impl JsonSchemaEngine {
    pub const ID: &'static str = "json-schema";

    pub fn new(max_input_bytes: usize) -> Result<Self, regex::Error> {
        let formats = FORMATS
            .iter()
            .map(|&(name, pattern)| {
                let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
                Ok((name, regex))
            })
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self {
            formats,
            max_input_bytes,
        })
    }

    fn check(&self, data: &str, schema: &str) -> EngineVerdict {
        let size = data.len() + schema.len();
        if size > self.max_input_bytes {
            return rejected(
                "input",
                format!(
                    "{size} bytes exceeds the limit of {} bytes",
                    self.max_input_bytes
                ),
                None,
            );
        }
        let data: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(err) => return rejected("data", err.to_string(), None),
        };
        let schema: Value = match serde_json::from_str(schema) {
            Ok(value) => value,
            Err(err) => return rejected("schema", err.to_string(), None),
        };

        let mut walk = Walk {
            formats: &self.formats,
            issues: Vec::new(),
        };
        if let Err(err) = walk.node(&data, &schema, "$") {
            return rejected("schema", err.to_string(), None);
        }
        let mut verdict = issues_verdict(walk.issues);
        // Nonconforming data is a false claim, not a hazard.
        if verdict.status == EngineStatus::Blocked {
            verdict.status = EngineStatus::Failed;
        }
        verdict
    }
}

struct Walk<'a> {
    formats: &'a [(&'static str, Regex)],
    issues: Vec<Issue>,
}

impl Walk<'_> {
    fn error(&mut self, rule: &str, path: &str, message: String) {
        self.issues
            .push(Issue::new(Severity::Critical, rule, format!("{path}: {message}")));
    }

    fn warning(&mut self, rule: &str, path: &str, message: String) {
        self.issues
            .push(Issue::new(Severity::Warning, rule, format!("{path}: {message}")));
    }

    fn node(&mut self, data: &Value, schema: &Value, path: &str) -> Result<(), SchemaError> {
        let schema = match schema {
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => {
                self.error("schema-false", path, "no value is allowed here".into());
                return Ok(());
            }
            Value::Object(schema) => schema,
            _ => {
                return Err(SchemaError::NotASchema {
                    path: path.to_string(),
                })
            }
        };

        match schema.get("type") {
            Some(Value::String(expected)) if !is_type(data, expected) => self.error(
                "type-mismatch",
                path,
                format!("expected {expected}, found {}", type_name(data)),
            ),
            Some(Value::Array(options))
                if !options
                    .iter()
                    .any(|t| t.as_str().is_some_and(|t| is_type(data, t))) =>
            {
                self.error(
                    "type-mismatch",
                    path,
                    format!("expected one of {}, found {}", Value::Array(options.clone()), type_name(data)),
                )
            }
            _ => {}
        }
        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.contains(data) {
                self.error(
                    "enum-violation",
                    path,
                    format!("{data} is not one of {}", Value::Array(allowed.clone())),
                );
            }
        }
        if let Some(expected) = schema.get("const") {
            if data != expected {
                self.error("const-violation", path, format!("expected exactly {expected}, found {data}"));
            }
        }

        match data {
            Value::String(text) => self.string(text, schema, path),
            Value::Number(number) => {
                if let Some(value) = number.as_f64() {
                    self.number(value, schema, path);
                }
                Ok(())
            }
            Value::Array(items) => self.array(items, schema, path),
            Value::Object(fields) => self.object(fields, schema, path),
            Value::Null | Value::Bool(_) => Ok(()),
        }
    }

    fn string(
        &mut self,
        text: &str,
        schema: &serde_json::Map<String, Value>,
        path: &str,
    ) -> Result<(), SchemaError> {
        let length = text.chars().count();
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (length as u64) < min {
                self.error("constraint-violation", path, format!("length {length} is below minLength {min}"));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if (length as u64) > max {
                self.error("constraint-violation", path, format!("length {length} is above maxLength {max}"));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            let regex = RegexBuilder::new(pattern)
                .size_limit(PATTERN_SIZE_LIMIT)
                .build()
                .map_err(|source| SchemaError::InvalidPattern {
                    path: path.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?;
            if !regex.is_match(text) {
                self.error("pattern-violation", path, format!("does not match /{pattern}/"));
            }
        }
        if let Some(format) = schema.get("format").and_then(Value::as_str) {
            let known = self.formats.iter().find(|(name, _)| *name == format);
            if let Some((_, regex)) = known {
                if !regex.is_match(text) {
                    self.warning("format-violation", path, format!("does not look like a {format}"));
                }
            }
        }
        Ok(())
    }

    fn number(&mut self, value: f64, schema: &serde_json::Map<String, Value>, path: &str) {
        let bound = |key: &str| schema.get(key).and_then(Value::as_f64);
        if let Some(min) = bound("minimum").filter(|min| value < *min) {
            self.error("constraint-violation", path, format!("{value} is below minimum {min}"));
        }
        if let Some(max) = bound("maximum").filter(|max| value > *max) {
            self.error("constraint-violation", path, format!("{value} is above maximum {max}"));
        }
        if let Some(min) = bound("exclusiveMinimum").filter(|min| value <= *min) {
            self.error("constraint-violation", path, format!("{value} must be greater than {min}"));
        }
        if let Some(max) = bound("exclusiveMaximum").filter(|max| value >= *max) {
            self.error("constraint-violation", path, format!("{value} must be less than {max}"));
        }
        if let Some(step) = bound("multipleOf").filter(|step| *step > 0.0) {
            let quotient = value / step;
            if (quotient - quotient.round()).abs() > 1e-9 {
                self.error("constraint-violation", path, format!("{value} is not a multiple of {step}"));
            }
        }
    }

    fn array(
        &mut self,
        items: &[Value],
        schema: &serde_json::Map<String, Value>,
        path: &str,
    ) -> Result<(), SchemaError> {
        let count = items.len() as u64;
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64).filter(|min| count < *min) {
            self.error("constraint-violation", path, format!("{count} items, minItems is {min}"));
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64).filter(|max| count > *max) {
            self.error("constraint-violation", path, format!("{count} items, maxItems is {max}"));
        }
        if schema.get("uniqueItems") == Some(&Value::Bool(true)) {
            let duplicate = items
                .iter()
                .enumerate()
                .any(|(i, item)| items[..i].contains(item));
            if duplicate {
                self.error("uniqueness-violation", path, "array contains duplicate items".into());
            }
        }
        match (schema.get("items"), schema.get("prefixItems")) {
            (Some(each @ (Value::Object(_) | Value::Bool(_))), _) => {
                for (index, item) in items.iter().enumerate() {
                    self.node(item, each, &format!("{path}[{index}]"))?;
                }
            }
            (_, Some(Value::Array(positional))) => {
                for (index, (item, item_schema)) in items.iter().zip(positional).enumerate() {
                    self.node(item, item_schema, &format!("{path}[{index}]"))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn object(
        &mut self,
        fields: &serde_json::Map<String, Value>,
        schema: &serde_json::Map<String, Value>,
        path: &str,
    ) -> Result<(), SchemaError> {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    self.error("missing-required", &format!("{path}.{name}"), "required property is missing".into());
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let additional = schema.get("additionalProperties");
        for (key, value) in fields {
            let field_path = format!("{path}.{key}");
            match properties.and_then(|p| p.get(key)) {
                Some(property) => self.node(value, property, &field_path)?,
                None => match additional {
                    Some(Value::Bool(false)) => self.warning(
                        "additional-property",
                        &field_path,
                        format!("property '{key}' is not declared"),
                    ),
                    Some(extra @ Value::Object(_)) => self.node(value, extra, &field_path)?,
                    _ => {}
                },
            }
        }

        let count = fields.len() as u64;
        if let Some(min) = schema.get("minProperties").and_then(Value::as_u64).filter(|min| count < *min) {
            self.error("constraint-violation", path, format!("{count} properties, minProperties is {min}"));
        }
        if let Some(max) = schema.get("maxProperties").and_then(Value::as_u64).filter(|max| count > *max) {
            self.error("constraint-violation", path, format!("{count} properties, maxProperties is {max}"));
        }
        Ok(())
    }
}

fn is_integer(value: &Value) -> bool {
    value.is_i64() || value.is_u64()
}

fn is_type(value: &Value, name: &str) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => is_integer(value),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) if is_integer(value) => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl VerificationEngine for JsonSchemaEngine {
    fn id(&self) -> &str {
        Self::ID
    }

    fn supports(&self, kind: ArtifactKind) -> bool {
        kind == ArtifactKind::Schema
    }

    fn default_weight(&self) -> f64 {
        1.0
    }

    fn verify(&self, artifact: &Artifact) -> Result<EngineVerdict, EngineFault> {
        match artifact {
            Artifact::Schema { data, schema } => Ok(self.check(data, schema)),
            other => Err(EngineFault::Internal(format!(
                "schema engine cannot verify {} artifacts",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::EngineDetail;

    const ORDER: &str = r#"{
        "type": "object",
        "required": ["subtotal", "total"],
        "properties": {
            "subtotal": { "type": "number", "minimum": 0 },
            "total": { "type": "number", "minimum": 0 },
            "currency": { "type": "string", "pattern": "^[A-Z]{3}$" },
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "price", "quantity"],
                    "properties": {
                        "name": { "type": "string" },
                        "price": { "type": "number", "minimum": 0 },
                        "quantity": { "type": "integer", "minimum": 1 }
                    }
                }
            }
        }
    }"#;

    fn verdict(data: &str, schema: &str) -> EngineVerdict {
        JsonSchemaEngine::new(100 * 1024)
            .unwrap()
            .verify(&Artifact::Schema {
                data: data.into(),
                schema: schema.into(),
            })
            .unwrap()
    }

    fn issues(verdict: &EngineVerdict) -> Vec<(String, String)> {
        match &verdict.detail {
            EngineDetail::Issues { issues } => issues
                .iter()
                .map(|i| (i.rule.clone(), i.message.clone()))
                .collect(),
            other => panic!("expected issues, got {other:?}"),
        }
    }

    #[test]
    fn conforming_document_is_verified() {
        let data = r#"{ "subtotal": 10, "total": 10.8, "currency": "USD",
                        "items": [{ "name": "pen", "price": 2.5, "quantity": 4 }] }"#;
        let v = verdict(data, ORDER);
        assert_eq!(v.status, EngineStatus::Verified);
        assert_eq!(v.confidence, 1.0);
    }

    #[test]
    fn violations_carry_their_path() {
        let data = r#"{ "subtotal": -1, "currency": "usd",
                        "items": [{ "name": "pen", "price": 2.5, "quantity": 1.5 }] }"#;
        let v = verdict(data, ORDER);
        assert_eq!(v.status, EngineStatus::Failed);
        let found = issues(&v);
        let has = |rule: &str, path: &str| {
            found
                .iter()
                .any(|(r, m)| r == rule && m.starts_with(&format!("{path}:")))
        };
        assert!(has("missing-required", "$.total"), "{found:?}");
        assert!(has("constraint-violation", "$.subtotal"), "{found:?}");
        assert!(has("pattern-violation", "$.currency"), "{found:?}");
        assert!(has("type-mismatch", "$.items[0].quantity"), "{found:?}");
    }

    #[test]
    fn integers_are_numbers_but_not_the_reverse() {
        let schema = r#"{ "type": "number" }"#;
        assert_eq!(verdict("3", schema).status, EngineStatus::Verified);
        let schema = r#"{ "type": "integer" }"#;
        assert_eq!(verdict("3.5", schema).status, EngineStatus::Failed);
        let schema = r#"{ "type": ["string", "null"] }"#;
        assert_eq!(verdict("null", schema).status, EngineStatus::Verified);
        assert_eq!(verdict("true", schema).status, EngineStatus::Failed);
    }

    #[test]
    fn enum_const_and_unique_items() {
        let schema = r#"{ "type": "array", "uniqueItems": true,
                          "items": { "enum": ["a", "b", "c"] } }"#;
        assert_eq!(verdict(r#"["a", "b"]"#, schema).status, EngineStatus::Verified);
        let v = verdict(r#"["a", "a", "z"]"#, schema);
        let rules: Vec<String> = issues(&v).into_iter().map(|(r, _)| r).collect();
        assert_eq!(rules, vec!["uniqueness-violation", "enum-violation"]);
        assert_eq!(verdict("2", r#"{ "const": 3 }"#).status, EngineStatus::Failed);
    }

    #[test]
    fn numeric_bounds() {
        let schema = r#"{ "exclusiveMinimum": 0, "maximum": 1, "multipleOf": 0.25 }"#;
        assert_eq!(verdict("0.75", schema).status, EngineStatus::Verified);
        assert_eq!(verdict("0", schema).status, EngineStatus::Failed);
        assert_eq!(verdict("0.3", schema).status, EngineStatus::Failed);
        assert_eq!(verdict("1.5", schema).status, EngineStatus::Failed);
    }

    #[test]
    fn advisory_findings_only_lower_confidence() {
        let schema = r#"{ "type": "object", "additionalProperties": false,
                          "properties": { "mail": { "type": "string", "format": "email" } } }"#;
        let v = verdict(r#"{ "mail": "not-an-address", "extra": 1 }"#, schema);
        assert_eq!(v.status, EngineStatus::Verified);
        assert!(v.confidence < 1.0);
        let mut rules: Vec<String> = issues(&v).into_iter().map(|(r, _)| r).collect();
        rules.sort();
        assert_eq!(rules, vec!["additional-property", "format-violation"]);
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        let v = verdict("{ not json", r#"{ "type": "object" }"#);
        assert!(matches!(v.detail, EngineDetail::InputRejected { ref stage, .. } if stage == "data"));
        let v = verdict("\"x\"", r#"{ "pattern": "(" }"#);
        assert!(matches!(v.detail, EngineDetail::InputRejected { ref stage, .. } if stage == "schema"));
        let v = verdict("1", "[1, 2]");
        assert_eq!(v.status, EngineStatus::Error);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let engine = JsonSchemaEngine::new(16).unwrap();
        let v = engine
            .verify(&Artifact::Schema {
                data: "[1, 2, 3, 4, 5, 6, 7, 8]".into(),
                schema: "{}".into(),
            })
            .unwrap();
        assert!(matches!(v.detail, EngineDetail::InputRejected { ref stage, .. } if stage == "input"));
    }
}
