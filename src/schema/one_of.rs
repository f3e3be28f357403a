//! `oneOf` variant tagging
//!
//! Every object variant receives a required constant property under
//! [`VARIANT_KEY`] holding its ordinal, so the active variant of a value can be
//! read off a single key instead of validating the value against each branch.

use serde_json::{json, Map, Value};

use crate::domain::VARIANT_KEY;

/// Tag the `oneOf` variants of `schema`; an empty vector when there are none.
///
/// Variants that are not object schemas are returned unchanged.
pub fn tag_one_of_variants(schema: &Value) -> Vec<Value> {
    let Some(variants) = schema.get("oneOf").and_then(Value::as_array) else {
        return Vec::new();
    };
    let base_is_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some();

    variants
        .iter()
        .enumerate()
        .map(|(index, variant)| tag_variant(variant, index, base_is_object))
        .collect()
}

/// Replace the `oneOf` array of `schema` with its tagged variants
pub fn apply_variant_tags(schema: &mut Value) {
    let tagged = tag_one_of_variants(schema);
    if tagged.is_empty() {
        return;
    }
    if let Some(obj) = schema.as_object_mut() {
        obj.insert("oneOf".to_string(), Value::Array(tagged));
    }
}

fn tag_variant(variant: &Value, index: usize, base_is_object: bool) -> Value {
    let Some(obj) = variant.as_object() else {
        return variant.clone();
    };
    let variant_type = obj.get("type").and_then(Value::as_str);
    let is_object = match variant_type {
        Some(t) => t == "object",
        None => base_is_object || obj.contains_key("properties"),
    };
    if !is_object {
        return variant.clone();
    }

    let mut tagged = obj.clone();
    if variant_type.is_none() {
        tagged.insert("type".to_string(), json!("object"));
    }

    let mut properties = tagged
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    properties.insert(VARIANT_KEY.to_string(), json!({ "const": index }));
    tagged.insert("properties".to_string(), Value::Object(properties));

    let mut required: Vec<Value> = tagged
        .get("required")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let key = Value::String(VARIANT_KEY.to_string());
    if !required.contains(&key) {
        required.push(key);
    }
    tagged.insert("required".to_string(), Value::Array(required));

    Value::Object(tagged)
}

/// True when the variant carries a discriminant
pub fn is_tagged(variant: &Value) -> bool {
    variant
        .get("properties")
        .and_then(|p| p.get(VARIANT_KEY))
        .is_some()
}

/// Discriminant constant declared by a tagged variant
pub fn variant_discriminant(variant: &Value) -> Option<u64> {
    variant
        .get("properties")?
        .get(VARIANT_KEY)?
        .get("const")?
        .as_u64()
}

/// Discriminant carried by a data value
pub fn value_discriminant(value: &Value) -> Option<u64> {
    value.as_object()?.get(VARIANT_KEY)?.as_u64()
}

/// Index of the first tagged variant whose discriminant matches the value
pub fn match_discriminant(variants: &[Value], value: &Value) -> Option<usize> {
    let wanted = value_discriminant(value)?;
    variants
        .iter()
        .position(|variant| is_tagged(variant) && variant_discriminant(variant) == Some(wanted))
}

/// Declared property names of a variant, without the discriminant
pub fn variant_property_names(variant: &Value) -> Vec<String> {
    variant
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .keys()
                .filter(|k| k.as_str() != VARIANT_KEY)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Remove every reserved discriminant key from a data value, recursively
pub fn strip_discriminants(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let stripped: Map<String, Value> = obj
                .iter()
                .filter(|(k, _)| k.as_str() != VARIANT_KEY)
                .map(|(k, v)| (k.clone(), strip_discriminants(v)))
                .collect();
            Value::Object(stripped)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_discriminants).collect()),
        other => other.clone(),
    }
}
