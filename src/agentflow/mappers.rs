//! Pure value mappers used at the agent↔tool boundary.
//!
//! Mappers translate between tool parameter objects and state value maps.
//! All of them are pure `Value → Value` transforms; the bridge composes
//! them into its param/result mapping hooks.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Extracts a nested field using dot/index notation.
///
/// Supported paths: `user.profile.name`, `items[0].sku`, `matrix[1][2]`.
///
/// ```rust
/// use agentflow::mappers::PathMapper;
/// use serde_json::json;
///
/// let value = json!({"items": [{"sku": "A-1"}, {"sku": "B-2"}]});
/// assert_eq!(PathMapper::new("items[1].sku").extract(&value), Some(json!("B-2")));
/// assert_eq!(PathMapper::new("items[9].sku").extract(&value), None);
/// ```
#[derive(Debug, Clone)]
pub struct PathMapper {
    path: String,
}

#[derive(Debug)]
enum Segment {
    Field(String),
    Index(usize),
}

impl PathMapper {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The path specification this mapper extracts.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        for part in self.path.split('.') {
            let mut rest = part;
            // Leading field name, then any number of [idx] suffixes.
            if let Some(bracket) = rest.find('[') {
                let (field, indices) = rest.split_at(bracket);
                if !field.is_empty() {
                    segments.push(Segment::Field(field.to_string()));
                }
                rest = indices;
                while let Some(stripped) = rest.strip_prefix('[') {
                    match stripped.find(']') {
                        Some(end) => {
                            if let Ok(index) = stripped[..end].parse::<usize>() {
                                segments.push(Segment::Index(index));
                            }
                            rest = &stripped[end + 1..];
                        }
                        None => break,
                    }
                }
            } else if !rest.is_empty() {
                segments.push(Segment::Field(rest.to_string()));
            }
        }
        segments
    }

    /// Resolve the path against `value`, cloning the extracted node.
    pub fn extract(&self, value: &Value) -> Option<Value> {
        let mut current = value;
        for segment in self.segments() {
            current = match segment {
                Segment::Field(name) => current.get(&name)?,
                Segment::Index(index) => current.get(index)?,
            };
        }
        Some(current.clone())
    }
}

/// Per-key conversion function.
pub type ConversionFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Applies per-key conversion rules to an object's entries; keys without a
/// rule pass through untouched.
#[derive(Clone, Default)]
pub struct TypeConversionMapper {
    rules: HashMap<String, ConversionFn>,
}

impl TypeConversionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conversion for `key` (builder pattern).
    pub fn with_rule(
        mut self,
        key: impl Into<String>,
        rule: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.rules.insert(key.into(), Arc::new(rule));
        self
    }

    /// Apply the rules. Non-object inputs pass through unchanged.
    pub fn apply(&self, value: &Value) -> Value {
        let Some(object) = value.as_object() else {
            return value.clone();
        };
        let mut out = Map::new();
        for (key, entry) in object {
            let converted = match self.rules.get(key) {
                Some(rule) => rule(entry),
                None => entry.clone(),
            };
            out.insert(key.clone(), converted);
        }
        Value::Object(out)
    }
}

/// Flattens nested objects into dotted keys, or expands dotted keys back
/// into nested objects, depending on the `flatten` flag.
///
/// ```rust
/// use agentflow::mappers::NestedStateMapper;
/// use serde_json::json;
///
/// let nested = json!({"user": {"profile": {"name": "Ada"}}, "n": 1});
/// let flat = NestedStateMapper::new(true).apply(&nested);
/// assert_eq!(flat, json!({"user.profile.name": "Ada", "n": 1}));
///
/// let back = NestedStateMapper::new(false).apply(&flat);
/// assert_eq!(back, nested);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NestedStateMapper {
    flatten: bool,
}

impl NestedStateMapper {
    /// `flatten = true` flattens; `flatten = false` expands dotted keys.
    pub fn new(flatten: bool) -> Self {
        Self { flatten }
    }

    /// Apply the configured direction. Non-object inputs pass through.
    pub fn apply(&self, value: &Value) -> Value {
        if self.flatten {
            flatten_value(value)
        } else {
            expand_value(value)
        }
    }
}

fn flatten_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let mut out = Map::new();
    for (key, entry) in object {
        flatten_into(&mut out, key, entry);
    }
    Value::Object(out)
}

fn flatten_into(out: &mut Map<String, Value>, prefix: &str, value: &Value) {
    match value.as_object() {
        Some(object) if !object.is_empty() => {
            for (key, entry) in object {
                flatten_into(out, &format!("{}.{}", prefix, key), entry);
            }
        }
        _ => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}

fn expand_value(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let mut out = Map::new();
    for (key, entry) in object {
        let mut cursor = &mut out;
        let parts: Vec<&str> = key.split('.').collect();
        for (position, part) in parts.iter().enumerate() {
            if position + 1 == parts.len() {
                cursor.insert(part.to_string(), entry.clone());
            } else {
                let slot = cursor
                    .entry(part.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                cursor = match slot.as_object_mut() {
                    Some(map) => map,
                    None => break,
                };
            }
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_mapper_walks_fields_and_indices() {
        let value = json!({
            "user": {"profile": {"name": "Ada"}},
            "items": [{"sku": "A"}, {"sku": "B"}],
            "grid": [[1, 2], [3, 4]]
        });
        assert_eq!(
            PathMapper::new("user.profile.name").extract(&value),
            Some(json!("Ada"))
        );
        assert_eq!(PathMapper::new("items[0].sku").extract(&value), Some(json!("A")));
        assert_eq!(PathMapper::new("grid[1][0]").extract(&value), Some(json!(3)));
        assert_eq!(PathMapper::new("missing.path").extract(&value), None);
    }

    #[test]
    fn conversion_mapper_applies_rules_per_key() {
        let mapper = TypeConversionMapper::new()
            .with_rule("count", |v| {
                json!(v.as_str().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
            })
            .with_rule("name", |v| {
                json!(v.as_str().map(|s| s.to_uppercase()).unwrap_or_default())
            });

        let out = mapper.apply(&json!({"count": "7", "name": "ada", "other": true}));
        assert_eq!(out, json!({"count": 7, "name": "ADA", "other": true}));
    }

    #[test]
    fn nested_mapper_round_trips() {
        let nested = json!({
            "a": {"b": {"c": 1}, "d": [1, 2]},
            "e": "x"
        });
        let flat = NestedStateMapper::new(true).apply(&nested);
        assert_eq!(flat, json!({"a.b.c": 1, "a.d": [1, 2], "e": "x"}));
        assert_eq!(NestedStateMapper::new(false).apply(&flat), nested);
    }
}
