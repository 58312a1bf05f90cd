//! Schema validation for inbound configuration and outbound results.
//!
//! Schemas are data, not code: each handler pipeline declares its input and
//! result shapes as JSON values and this module checks conformance. The
//! supported vocabulary is the subset those shapes use — `type`, `required`,
//! closed objects (`additionalProperties: false`), `enum`, `const`,
//! inclusive `minimum`/`maximum`, `anyOf`, `items`, and structural `format`
//! checks for `date`/`date-time` (shape only, no calendar validation).
//!
//! Inbound failure is fatal to the unit of work; outbound failure is
//! reported but never blocks delivery.

use crate::error::{GleanerError, GleanerResult, PathedError};
use regex::Regex;
use serde_json::Value;

/// Outcome of one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<PathedError>,
}

impl ValidationResult {
    fn passed() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
        }
    }
}

/// Validate `value` against `schema`.
pub fn validate(value: &Value, schema: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    check(value, schema, "", &mut errors);
    ValidationResult {
        ok: errors.is_empty(),
        errors,
    }
}

/// Fill absent optional properties from schema `default` values, recursively
/// through declared object properties.
pub fn apply_defaults(value: &mut Value, schema: &Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(object) = value.as_object_mut() else {
        return;
    };

    for (name, prop_schema) in properties {
        if let Some(default) = prop_schema.get("default") {
            object
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
        if let Some(existing) = object.get_mut(name) {
            apply_defaults(existing, prop_schema);
        }
    }
}

/// Apply defaults, then validate. Used on inbound unit-of-work parameters;
/// failure is fatal before any extraction begins.
pub fn validate_config(mut value: Value, schema: &Value) -> GleanerResult<Value> {
    apply_defaults(&mut value, schema);
    let result = validate(&value, schema);
    if result.ok {
        Ok(value)
    } else {
        Err(GleanerError::ConfigValidation {
            errors: result.errors,
        })
    }
}

fn check(value: &Value, schema: &Value, path: &str, errors: &mut Vec<PathedError>) {
    // anyOf first: the union decides which branch's constraints apply. The
    // value passes if any alternative passes cleanly.
    if let Some(alternatives) = schema.get("anyOf").and_then(Value::as_array) {
        let matched = alternatives.iter().any(|alt| validate(value, alt).ok);
        if !matched {
            push(errors, path, "matched no anyOf alternative");
        }
        return;
    }

    if let Some(expected) = schema.get("const") {
        if value != expected {
            push(errors, path, &format!("expected constant {expected}"));
        }
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            push(errors, path, &format!("not one of {allowed:?}"));
        }
        return;
    }

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(value, expected) {
            push(errors, path, &format!("expected type '{expected}'"));
            return;
        }
    }

    match value {
        Value::Object(object) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !object.contains_key(name) {
                        push(errors, &join(path, name), "required property missing");
                    }
                }
            }

            let properties = schema.get("properties").and_then(Value::as_object);
            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

            for (name, prop_value) in object {
                match properties.and_then(|p| p.get(name)) {
                    Some(prop_schema) => {
                        check(prop_value, prop_schema, &join(path, name), errors);
                    }
                    None if closed => {
                        push(errors, &join(path, name), "undeclared property");
                    }
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (idx, item) in items.iter().enumerate() {
                    check(item, item_schema, &join(path, &idx.to_string()), errors);
                }
            }
        }
        Value::Number(number) => {
            let n = number.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    push(errors, path, &format!("below minimum {min}"));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    push(errors, path, &format!("above maximum {max}"));
                }
            }
        }
        Value::String(text) => {
            if let Some(format) = schema.get("format").and_then(Value::as_str) {
                if !format_matches(text, format) {
                    push(errors, path, &format!("does not match format '{format}'"));
                }
            }
        }
        _ => {}
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}

/// Structural format check — shape only, no calendar validation.
fn format_matches(text: &str, format: &str) -> bool {
    match format {
        "date" => Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap().is_match(text),
        "date-time" => Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})$")
            .unwrap()
            .is_match(text),
        _ => true,
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn push(errors: &mut Vec<PathedError>, path: &str, message: &str) {
    errors.push(PathedError {
        path: path.to_string(),
        message: message.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review_input_schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "only": {"default": true, "type": "boolean"},
                "page": {"default": 1, "type": "integer"},
                "sortBy": {"default": "recent", "enum": ["recent", "helpful"]},
                "sku": {"type": "string"},
            },
            "required": ["sku"],
        })
    }

    #[test]
    fn test_missing_required_sku_fails_with_pathed_error() {
        let result = validate(&json!({"page": 2}), &review_input_schema());
        assert!(!result.ok);
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "sku" && e.message.contains("required")));
    }

    #[test]
    fn test_defaults_applied_before_validation() {
        let value = validate_config(json!({"sku": "X1"}), &review_input_schema()).unwrap();
        assert_eq!(value["page"], 1);
        assert_eq!(value["only"], true);
        assert_eq!(value["sortBy"], "recent");
    }

    #[test]
    fn test_config_failure_is_fatal() {
        let err = validate_config(json!({"page": 1}), &review_input_schema()).unwrap_err();
        assert!(matches!(err, GleanerError::ConfigValidation { .. }));
    }

    #[test]
    fn test_closed_shape_rejects_undeclared_property() {
        let result = validate(
            &json!({"sku": "X1", "color": "red"}),
            &review_input_schema(),
        );
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.path == "color"));
    }

    #[test]
    fn test_enum_membership() {
        let result = validate(
            &json!({"sku": "X1", "sortBy": "newest"}),
            &review_input_schema(),
        );
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.path == "sortBy"));
    }

    #[test]
    fn test_numeric_range_inclusive() {
        let schema = json!({"type": "number", "minimum": 0, "maximum": 5});
        assert!(validate(&json!(0), &schema).ok);
        assert!(validate(&json!(5), &schema).ok);
        assert!(!validate(&json!(5.1), &schema).ok);
        assert!(!validate(&json!(-1), &schema).ok);
    }

    #[test]
    fn test_nullable_union() {
        let schema = json!({"anyOf": [{"type": "string"}, {"type": "null"}]});
        assert!(validate(&json!("text"), &schema).ok);
        assert!(validate(&Value::Null, &schema).ok);
        assert!(!validate(&json!(5), &schema).ok);
    }

    #[test]
    fn test_const_match() {
        let schema = json!({"const": 2});
        assert!(validate(&json!(2), &schema).ok);
        assert!(!validate(&json!(3), &schema).ok);
    }

    #[test]
    fn test_format_checks_are_structural() {
        let date = json!({"type": "string", "format": "date"});
        assert!(validate(&json!("2022-10-18"), &date).ok);
        assert!(!validate(&json!("18.10.2022"), &date).ok);
        // Shape only: an impossible calendar day still passes.
        assert!(validate(&json!("2022-13-45"), &date).ok);

        let datetime = json!({"type": "string", "format": "date-time"});
        assert!(validate(&json!("2023-03-05T00:00:00.000Z"), &datetime).ok);
        assert!(!validate(&json!("2023-03-05"), &datetime).ok);
    }

    #[test]
    fn test_array_items_report_indexed_paths() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}},
        });
        let result = validate(&json!([{"id": "a"}, {}]), &schema);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.path == "1.id"));
    }
}
