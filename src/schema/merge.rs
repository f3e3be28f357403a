//! `allOf` merging
//!
//! Entries are folded into the base schema in declaration order. Object
//! properties and array items merge recursively through [`distribute`], which
//! carries a depth budget so pathological nesting cannot blow up: once the
//! budget is spent the addition is parked in a nested `allOf` that the child
//! node merges when it is built.

use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::{SchemaError, SchemaResult};

/// Depth budget for object constraints
pub const OBJECT_MERGE_DEPTH: usize = 3;
/// Depth budget for array constraints
pub const ARRAY_MERGE_DEPTH: usize = 2;
/// Depth budget for scalar constraints
pub const SCALAR_MERGE_DEPTH: usize = 1;

const LOWER_BOUNDS: &[&str] = &[
    "minimum",
    "exclusiveMinimum",
    "minLength",
    "minItems",
    "minProperties",
    "minContains",
];

const UPPER_BOUNDS: &[&str] = &[
    "maximum",
    "exclusiveMaximum",
    "maxLength",
    "maxItems",
    "maxProperties",
    "maxContains",
];

/// Merge every `allOf` entry into its parent schema.
///
/// Fails with [`SchemaError::AllOfTypeRedefinition`] as soon as an entry
/// declares a `type` different from the accumulated one. The input is not
/// modified.
pub fn merge_all_of(schema: &Value) -> SchemaResult<Value> {
    let Some((mut base, entries)) = split_all_of(schema) else {
        return Ok(schema.clone());
    };
    for (index, entry) in entries.iter().enumerate() {
        let entry = merge_all_of(entry)?;
        fold_entry(&mut base, &entry, index)?;
    }
    Ok(Value::Object(base))
}

/// Like [`merge_all_of`], but an entry that fails to merge is skipped and its
/// error collected instead of aborting the whole merge.
pub fn merge_all_of_lenient(schema: &Value) -> (Value, Vec<SchemaError>) {
    let Some((mut base, entries)) = split_all_of(schema) else {
        return (schema.clone(), Vec::new());
    };
    let mut errors = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let attempt = merge_all_of(entry).and_then(|entry| {
            let mut candidate = base.clone();
            fold_entry(&mut candidate, &entry, index)?;
            Ok(candidate)
        });
        match attempt {
            Ok(candidate) => base = candidate,
            Err(err) => {
                warn!(index, error = %err, "Skipping allOf entry");
                errors.push(err);
            }
        }
    }
    (Value::Object(base), errors)
}

/// Merge `addition` into `base` as if it were a single `allOf` entry
pub fn merge_into(base: &mut Value, addition: &Value) -> SchemaResult<()> {
    let Some(extra) = addition.as_object() else {
        return Ok(());
    };
    let Some(base_map) = base.as_object_mut() else {
        *base = Value::Object(extra.clone());
        return Ok(());
    };
    fold_entry(base_map, addition, 0)
}

fn split_all_of(schema: &Value) -> Option<(Map<String, Value>, Vec<Value>)> {
    let obj = schema.as_object()?;
    let entries = obj.get("allOf")?.as_array()?.clone();
    let mut base = obj.clone();
    base.remove("allOf");
    Some((base, entries))
}

fn fold_entry(base: &mut Map<String, Value>, addition: &Value, index: usize) -> SchemaResult<()> {
    let Some(addition) = addition.as_object() else {
        // `true` adds nothing; `false` cannot be expressed as sibling keywords
        return Ok(());
    };
    let depth = depth_for(base.get("type").or_else(|| addition.get("type")));
    fold_with_depth(base, addition, index, depth)
}

fn fold_with_depth(
    base: &mut Map<String, Value>,
    addition: &Map<String, Value>,
    index: usize,
    depth: usize,
) -> SchemaResult<()> {
    if let Some(found) = addition.get("type") {
        match base.get("type") {
            Some(existing) if existing != found => {
                return Err(SchemaError::AllOfTypeRedefinition {
                    index,
                    base: type_label(existing),
                    found: type_label(found),
                });
            }
            Some(_) => {}
            None => {
                base.insert("type".to_string(), found.clone());
            }
        }
    }

    for (key, value) in addition {
        match key.as_str() {
            "type" => {}
            "properties" => merge_properties(base, value, index, depth)?,
            "items" => {
                let merged = match base.get("items") {
                    Some(existing) => distribute(existing, value, index, depth)?,
                    None => value.clone(),
                };
                base.insert("items".to_string(), merged);
            }
            "required" => union_strings(base, "required", value),
            "enum" => intersect_enum(base, value),
            "computed" | "errorMessages" => merge_maps(base, key, value),
            "oneOf" => {
                if base.contains_key("oneOf") {
                    warn!(index, "allOf entry redeclares oneOf, keeping the first declaration");
                } else {
                    base.insert(key.clone(), value.clone());
                }
            }
            k if LOWER_BOUNDS.contains(&k) => tighten(base, k, value, |a, b| a >= b),
            k if UPPER_BOUNDS.contains(&k) => tighten(base, k, value, |a, b| a <= b),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

fn merge_properties(
    base: &mut Map<String, Value>,
    addition: &Value,
    index: usize,
    depth: usize,
) -> SchemaResult<()> {
    let Some(addition) = addition.as_object() else {
        return Ok(());
    };
    let mut properties = base
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (name, schema) in addition {
        let merged = match properties.get(name) {
            Some(existing) => distribute(existing, schema, index, depth)?,
            None => schema.clone(),
        };
        properties.insert(name.clone(), merged);
    }
    base.insert("properties".to_string(), Value::Object(properties));
    Ok(())
}

/// Merge two subschemas one level below the current one
fn distribute(existing: &Value, addition: &Value, index: usize, depth: usize) -> SchemaResult<Value> {
    let (Some(existing_map), Some(addition_map)) = (existing.as_object(), addition.as_object()) else {
        return Ok(addition.clone());
    };
    let child_type = existing_map.get("type").or_else(|| addition_map.get("type"));
    let budget = depth.saturating_sub(1).min(depth_for(child_type));
    if budget == 0 {
        let mut deferred = existing_map.clone();
        let mut pending = deferred
            .get("allOf")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        pending.push(addition.clone());
        deferred.insert("allOf".to_string(), Value::Array(pending));
        return Ok(Value::Object(deferred));
    }
    let mut merged = existing_map.clone();
    fold_with_depth(&mut merged, addition_map, index, budget)?;
    Ok(Value::Object(merged))
}

fn depth_for(schema_type: Option<&Value>) -> usize {
    match schema_type.and_then(Value::as_str) {
        Some("object") => OBJECT_MERGE_DEPTH,
        Some("array") => ARRAY_MERGE_DEPTH,
        Some(_) => SCALAR_MERGE_DEPTH,
        None => OBJECT_MERGE_DEPTH,
    }
}

fn type_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn union_strings(base: &mut Map<String, Value>, key: &str, addition: &Value) {
    let mut merged: Vec<Value> = base
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(items) = addition.as_array() {
        for item in items {
            if !merged.contains(item) {
                merged.push(item.clone());
            }
        }
    }
    base.insert(key.to_string(), Value::Array(merged));
}

fn intersect_enum(base: &mut Map<String, Value>, addition: &Value) {
    let merged = match (base.get("enum").and_then(Value::as_array), addition.as_array()) {
        (Some(existing), Some(incoming)) => existing
            .iter()
            .filter(|v| incoming.contains(v))
            .cloned()
            .collect(),
        _ => match addition.as_array() {
            Some(incoming) => incoming.clone(),
            None => return,
        },
    };
    base.insert("enum".to_string(), Value::Array(merged));
}

fn merge_maps(base: &mut Map<String, Value>, key: &str, addition: &Value) {
    let Some(addition) = addition.as_object() else {
        return;
    };
    let mut merged = base
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (k, v) in addition {
        merged.insert(k.clone(), v.clone());
    }
    base.insert(key.to_string(), Value::Object(merged));
}

/// Keep whichever bound is tighter; `keep_existing(existing, incoming)` decides
fn tighten(base: &mut Map<String, Value>, key: &str, addition: &Value, keep_existing: fn(f64, f64) -> bool) {
    let existing = base.get(key).and_then(Value::as_f64);
    match (existing, addition.as_f64()) {
        (Some(a), Some(b)) if keep_existing(a, b) => {}
        _ => {
            base.insert(key.to_string(), addition.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_properties_union() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "allOf": [
                { "properties": { "b": { "type": "number" } }, "required": ["b"] },
                { "properties": { "a": { "minLength": 2 } }, "required": ["a", "b"] }
            ]
        });

        let merged = merge_all_of(&schema).unwrap();
        assert!(merged.get("allOf").is_none());
        assert_eq!(merged["properties"]["a"], json!({ "type": "string", "minLength": 2 }));
        assert_eq!(merged["properties"]["b"], json!({ "type": "number" }));
        assert_eq!(merged["required"], json!(["b", "a"]));
    }

    #[test]
    fn test_type_redefinition_is_an_error() {
        let schema = json!({
            "allOf": [{ "type": "object" }, { "type": "string" }]
        });
        let err = merge_all_of(&schema).unwrap_err();
        assert_eq!(err.code(), "ALL_OF_TYPE_REDEFINITION");
    }

    #[test]
    fn test_nested_property_type_conflict_is_an_error() {
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "allOf": [{ "properties": { "a": { "type": "number" } } }]
        });
        assert!(merge_all_of(&schema).is_err());
    }

    #[test]
    fn test_lenient_merge_skips_bad_entry() {
        let schema = json!({
            "type": "object",
            "allOf": [
                { "type": "string" },
                { "properties": { "ok": { "type": "boolean" } } }
            ]
        });
        let (merged, errors) = merge_all_of_lenient(&schema);
        assert_eq!(errors.len(), 1);
        assert_eq!(merged["type"], "object");
        assert_eq!(merged["properties"]["ok"]["type"], "boolean");
    }

    #[test]
    fn test_incremental_merge_matches_single_pass() {
        let a = json!({ "properties": { "x": { "type": "string", "maxLength": 10 } } });
        let b = json!({ "properties": { "x": { "minLength": 1 } }, "required": ["x"] });
        let c = json!({ "properties": { "y": { "type": "integer" } }, "maxProperties": 4 });

        let two = merge_all_of(&json!({ "type": "object", "allOf": [a.clone(), b.clone()] })).unwrap();
        let mut then_c = two.clone();
        then_c["allOf"] = json!([c.clone()]);
        let stepwise = merge_all_of(&then_c).unwrap();

        let single = merge_all_of(&json!({ "type": "object", "allOf": [a, b, c] })).unwrap();
        assert_eq!(stepwise, single);
    }

    #[test]
    fn test_merge_into_folds_one_entry() {
        let mut base = json!({ "type": "object", "properties": { "a": { "type": "string" } } });
        merge_into(&mut base, &json!({ "properties": { "b": { "type": "integer" } }, "required": ["b"] })).unwrap();
        assert_eq!(base["properties"]["b"]["type"], json!("integer"));
        assert_eq!(base["required"], json!(["b"]));

        merge_into(&mut base, &json!(true)).unwrap();
        assert!(merge_into(&mut base, &json!({ "type": "array" })).is_err());

        let mut empty = Value::Null;
        merge_into(&mut empty, &json!({ "type": "string" })).unwrap();
        assert_eq!(empty, json!({ "type": "string" }));
    }

    #[test]
    fn test_bounds_tighten() {
        let schema = json!({
            "type": "number",
            "minimum": 1,
            "maximum": 10,
            "allOf": [{ "minimum": 3, "maximum": 20 }]
        });
        let merged = merge_all_of(&schema).unwrap();
        assert_eq!(merged["minimum"], json!(3));
        assert_eq!(merged["maximum"], json!(10));
    }

    #[test]
    fn test_enum_intersection() {
        let schema = json!({
            "type": "string",
            "enum": ["a", "b", "c"],
            "allOf": [{ "enum": ["b", "c", "d"] }]
        });
        let merged = merge_all_of(&schema).unwrap();
        assert_eq!(merged["enum"], json!(["b", "c"]));
    }

    #[test]
    fn test_deep_nesting_defers_past_budget() {
        let schema = json!({
            "type": "object",
            "properties": { "l1": { "type": "object", "properties": { "l2": { "type": "object",
                "properties": { "l3": { "type": "object", "properties": {} } } } } } },
            "allOf": [{
                "properties": { "l1": { "properties": { "l2": { "properties": { "l3": {
                    "properties": { "leaf": { "type": "string" } } } } } } } }
            }]
        });
        let merged = merge_all_of(&schema).unwrap();
        let l3 = &merged["properties"]["l1"]["properties"]["l2"]["properties"]["l3"];
        assert!(l3.get("allOf").is_some());
        let resolved = merge_all_of(l3).unwrap();
        assert_eq!(resolved["properties"]["leaf"]["type"], "string");
    }

    #[test]
    fn test_input_is_untouched() {
        let schema = json!({ "type": "object", "allOf": [{ "required": ["a"] }] });
        let before = schema.clone();
        let _ = merge_all_of(&schema).unwrap();
        assert_eq!(schema, before);
    }
}
