//! JSON-schema helpers for tool parameters and structured output.
//!
//! The crate treats schemas as plain `serde_json::Value`s shaped like JSON
//! Schema (`{"type": "object", "properties": {...}, "required": [...]}`).
//! Three operations live here:
//!
//! - [`coerce_params`] — best-effort coercion of incoming params against a
//!   schema (numeric strings become numbers, `"true"`/`"false"` become
//!   booleans, declared defaults fill missing keys). Coercion never fails;
//!   values it cannot fix pass through untouched for validation to flag.
//! - [`validate`] — minimal structural validation: `type`, `required`,
//!   `enum`, and nested `properties`. Used for structured-output checking
//!   in the agent loop.
//! - [`infer_schema`] / [`schema_defaults`] — derive an object schema from
//!   an example value and materialize a defaults map back out of a schema.
//!   The two functions round-trip up to default-value normalization.

use serde_json::{json, Map, Value};

/// Best-effort coercion of `params` against `schema`.
///
/// Returns a new value; the input is never mutated. Unknown keys and
/// non-object params pass through unchanged.
pub fn coerce_params(schema: &Value, params: &Value) -> Value {
    let properties = match schema.get("properties").and_then(Value::as_object) {
        Some(p) => p,
        None => return params.clone(),
    };
    let incoming = match params.as_object() {
        Some(o) => o,
        None => return params.clone(),
    };

    let mut out = incoming.clone();
    for (key, prop) in properties {
        match out.get(key) {
            Some(value) => {
                let coerced = coerce_value(prop, value);
                out.insert(key.clone(), coerced);
            }
            None => {
                if let Some(default) = prop.get("default") {
                    out.insert(key.clone(), default.clone());
                }
            }
        }
    }
    Value::Object(out)
}

fn coerce_value(prop: &Value, value: &Value) -> Value {
    let target = prop.get("type").and_then(Value::as_str).unwrap_or("");
    match (target, value) {
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        ("integer", Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| value.clone()),
        ("integer", Value::Number(n)) => {
            // Accept whole-valued floats for integer slots.
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && n.as_i64().is_none() => {
                    Value::Number((f as i64).into())
                }
                _ => value.clone(),
            }
        }
        ("boolean", Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        ("string", Value::Number(n)) => Value::String(n.to_string()),
        ("object", Value::Object(_)) => coerce_params(prop, value),
        _ => value.clone(),
    }
}

/// Validate `value` against `schema`. Returns the list of violations; an
/// empty list means the value conforms.
pub fn validate(schema: &Value, value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_at(schema, value, "$", &mut errors);
    errors
}

fn validate_at(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            errors.push(format!(
                "{}: expected {}, got {}",
                path,
                expected,
                type_name(value)
            ));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{}: value not in enum", path));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    errors.push(format!("{}: missing required field '{}'", path, name));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop) in properties {
                if let Some(field) = obj.get(key) {
                    validate_at(prop, field, &format!("{}.{}", path, key), errors);
                }
            }
        }
    }

    if let (Some(items), Some(array)) = (schema.get("items"), value.as_array()) {
        for (i, item) in array.iter().enumerate() {
            validate_at(items, item, &format!("{}[{}]", path, i), errors);
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        _ => true,
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

/// Infer an object schema from an example value.
///
/// Every leaf becomes a typed property carrying the example as its
/// `default`, so [`schema_defaults`] can reconstruct the original map.
pub fn infer_schema(example: &Value) -> Value {
    match example {
        Value::Object(map) => {
            let mut properties = Map::new();
            for (key, value) in map {
                properties.insert(key.clone(), infer_schema(value));
            }
            json!({"type": "object", "properties": Value::Object(properties)})
        }
        Value::Array(items) => {
            let item_schema = items.first().map(infer_schema).unwrap_or(json!({}));
            json!({"type": "array", "items": item_schema, "default": example})
        }
        leaf => json!({"type": type_name(leaf), "default": leaf}),
    }
}

/// Materialize the defaults declared by a schema into a value.
///
/// Inverse of [`infer_schema`] up to default normalization: properties
/// without a `default` are omitted.
pub fn schema_defaults(schema: &Value) -> Value {
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut out = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, prop) in properties {
                    let value = schema_defaults(prop);
                    if !value.is_null() || prop.get("default").is_some() {
                        out.insert(key.clone(), value);
                    }
                }
            }
            Value::Object(out)
        }
        _ => Value::Null,
    }
}

/// An open object schema accepting any parameters.
pub fn open_object_schema() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": true})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["add", "divide"]},
                "operand1": {"type": "number"},
                "operand2": {"type": "number", "default": 1.0},
                "exact": {"type": "boolean"}
            },
            "required": ["operation", "operand1"]
        })
    }

    #[test]
    fn coerces_numeric_strings_and_fills_defaults() {
        let coerced = coerce_params(
            &calc_schema(),
            &json!({"operation": "add", "operand1": "10.5", "exact": "true"}),
        );
        assert_eq!(coerced["operand1"], json!(10.5));
        assert_eq!(coerced["operand2"], json!(1.0));
        assert_eq!(coerced["exact"], json!(true));
    }

    #[test]
    fn coercion_leaves_unfixable_values_alone() {
        let coerced = coerce_params(&calc_schema(), &json!({"operand1": "not-a-number"}));
        assert_eq!(coerced["operand1"], json!("not-a-number"));
    }

    #[test]
    fn validate_reports_missing_and_mistyped() {
        let errors = validate(&calc_schema(), &json!({"operand1": "x"}));
        assert!(errors.iter().any(|e| e.contains("missing required field 'operation'")));
        assert!(errors.iter().any(|e| e.contains("expected number")));
        assert!(validate(&calc_schema(), &json!({"operation": "add", "operand1": 2})).is_empty());
    }

    #[test]
    fn validate_checks_enums() {
        let errors = validate(&calc_schema(), &json!({"operation": "modulo", "operand1": 2}));
        assert!(errors.iter().any(|e| e.contains("not in enum")));
    }

    #[test]
    fn infer_then_defaults_round_trips() {
        let example = json!({
            "name": "Ada",
            "age": 36,
            "tags": ["a", "b"],
            "profile": {"active": true}
        });
        let schema = infer_schema(&example);
        assert_eq!(schema_defaults(&schema), example);
    }
}
