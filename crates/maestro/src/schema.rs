//! A lightweight JSON Schema validator for tool parameters.
//!
//! Supports the subset tool authors actually use: a top-level
//! `type: object` with `properties`, `required` and
//! `additionalProperties: false`; per-property `type`, `enum`, numeric
//! `minimum`/`maximum`, string `minLength`/`maxLength`/`pattern`, and
//! `items` with recursive validation for arrays.

use regex::Regex;
use serde_json::Value;

/// Validate `value` against `schema`. Returns all violations joined into
/// a single message so the model sees every problem at once.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    let mut errors = Vec::new();
    validate_value(schema, value, "", &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

fn validate_value(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            errors.push(format!(
                "{}: expected {}, got {}",
                display_path(path),
                expected,
                type_name(value)
            ));
            return;
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!(
                "{}: value {} is not one of the allowed values",
                display_path(path),
                value
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if n < min {
                errors.push(format!("{}: {} is below minimum {}", display_path(path), n, min));
            }
        }
        if let Some(max) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if n > max {
                errors.push(format!("{}: {} is above maximum {}", display_path(path), n, max));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min_len) = schema_obj.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min_len {
                errors.push(format!(
                    "{}: string is shorter than minLength {}",
                    display_path(path),
                    min_len
                ));
            }
        }
        if let Some(max_len) = schema_obj.get("maxLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) > max_len {
                errors.push(format!(
                    "{}: string is longer than maxLength {}",
                    display_path(path),
                    max_len
                ));
            }
        }
        if let Some(pattern) = schema_obj.get("pattern").and_then(Value::as_str) {
            match Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(s) {
                        errors.push(format!(
                            "{}: string does not match pattern {}",
                            display_path(path),
                            pattern
                        ));
                    }
                }
                Err(_) => errors.push(format!(
                    "{}: schema pattern {} is not a valid regex",
                    display_path(path),
                    pattern
                )),
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                validate_value(item_schema, item, &item_path, errors);
            }
        }
    }

    if let Some(obj) = value.as_object() {
        let properties = schema_obj.get("properties").and_then(Value::as_object);

        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    errors.push(format!(
                        "{}: missing required property '{}'",
                        display_path(path),
                        name
                    ));
                }
            }
        }

        if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in obj.keys() {
                let known = properties.map(|p| p.contains_key(key)).unwrap_or(false);
                if !known {
                    errors.push(format!(
                        "{}: unexpected property '{}'",
                        display_path(path),
                        key
                    ));
                }
            }
        }

        if let Some(properties) = properties {
            for (name, prop_schema) in properties {
                if let Some(prop_value) = obj.get(name) {
                    let prop_path = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{}.{}", path, name)
                    };
                    validate_value(prop_schema, prop_value, &prop_path, errors);
                }
            }
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "parameters"
    } else {
        path
    }
}
