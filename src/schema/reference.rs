//! `$ref` expansion and the reference table
//!
//! The table is filled up front (from the root document, explicit inserts or a
//! directory of schema files) so lookups during node construction never touch
//! the filesystem.

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::domain::{ReferenceResolver, SchemaError, SchemaResult};

/// Keywords whose values are data, not subschemas
const DATA_KEYWORDS: &[&str] = &["const", "enum", "default", "examples"];

/// In-memory `pointer -> schema` lookup
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    /// Exact pointer entries
    entries: HashMap<String, Value>,
    /// Whole documents addressable as `<id>` and `<id>#/json/pointer`; the
    /// root document has the empty id
    documents: HashMap<String, Value>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table that resolves `#/...` pointers into `schema`
    pub fn from_schema(schema: &Value) -> Self {
        let mut table = Self::default();
        table.add_document("", schema.clone());
        table
    }

    /// Register a schema under an exact pointer
    pub fn insert(&mut self, pointer: impl Into<String>, schema: Value) {
        self.entries.insert(pointer.into(), schema);
    }

    pub fn add_document(&mut self, id: impl Into<String>, document: Value) {
        self.documents.insert(id.into(), document);
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every `*.json`, `*.yaml`, `*.yml` and `*.toml` file in `dir` as a
    /// document keyed by its file name. Returns the number of documents loaded.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let pattern = format!("{}/*", dir.as_ref().display());
        let mut loaded = 0;
        for entry in glob::glob(&pattern)? {
            match entry {
                Ok(path) => {
                    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                        continue;
                    };
                    if !matches!(ext, "json" | "yaml" | "yml" | "toml") {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let content = std::fs::read_to_string(&path)?;
                    let document: Value = match ext {
                        "json" => serde_json::from_str(&content)?,
                        "toml" => toml::from_str(&content)?,
                        _ => serde_yaml::from_str(&content)?,
                    };
                    debug!(document = name, "Loaded reference document");
                    self.add_document(name.to_string(), document);
                    loaded += 1;
                }
                Err(e) => warn!("Failed to read glob entry: {}", e),
            }
        }
        Ok(loaded)
    }
}

impl ReferenceResolver for ReferenceTable {
    fn resolve_reference(&self, pointer: &str) -> Option<Value> {
        if let Some(schema) = self.entries.get(pointer) {
            return Some(schema.clone());
        }
        let (document, fragment) = match pointer.split_once('#') {
            Some((doc, fragment)) => (doc, fragment),
            None => (pointer, ""),
        };
        let document = self.documents.get(document)?;
        if fragment.is_empty() {
            return Some(document.clone());
        }
        document.pointer(fragment).cloned()
    }
}

/// Replace every `$ref` in `schema` (at any depth) with the schema the
/// resolver returns for it.
///
/// Keywords next to a `$ref` are laid over the referenced schema. A missing
/// mapping or a reference chain that loops back on itself is an error; the
/// input schema is not modified.
pub fn expand_references(schema: &Value, resolver: &dyn ReferenceResolver) -> SchemaResult<Value> {
    let mut chain = Vec::new();
    expand(schema, resolver, &mut chain)
}

fn expand(schema: &Value, resolver: &dyn ReferenceResolver, chain: &mut Vec<String>) -> SchemaResult<Value> {
    match schema {
        Value::Object(obj) => {
            let mut expanded = Map::new();
            for (key, value) in obj {
                if key == "$ref" {
                    continue;
                }
                let value = if DATA_KEYWORDS.contains(&key.as_str()) {
                    value.clone()
                } else {
                    expand(value, resolver, chain)?
                };
                expanded.insert(key.clone(), value);
            }

            let Some(pointer) = obj.get("$ref").and_then(Value::as_str) else {
                return Ok(Value::Object(expanded));
            };
            let target = follow(pointer, resolver, chain)?;
            Ok(overlay(target, expanded))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| expand(item, resolver, chain))
            .collect::<SchemaResult<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn follow(pointer: &str, resolver: &dyn ReferenceResolver, chain: &mut Vec<String>) -> SchemaResult<Value> {
    if chain.iter().any(|seen| seen == pointer) {
        return Err(SchemaError::CircularReference(pointer.to_string()));
    }
    let target = resolver
        .resolve_reference(pointer)
        .ok_or_else(|| SchemaError::UnresolvedReference(pointer.to_string()))?;
    chain.push(pointer.to_string());
    let result = expand(&target, resolver, chain);
    chain.pop();
    result
}

/// Lay sibling keywords over a referenced schema
pub(crate) fn overlay(target: Value, siblings: Map<String, Value>) -> Value {
    if siblings.is_empty() {
        return target;
    }
    match target {
        Value::Object(mut base) => {
            for (key, value) in siblings {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        _ => Value::Object(siblings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expand_nested_references() {
        let root = json!({
            "type": "object",
            "properties": {
                "user": { "$ref": "#/$defs/User" }
            },
            "$defs": {
                "User": {
                    "type": "object",
                    "properties": { "address": { "$ref": "#/$defs/Address" } }
                },
                "Address": { "type": "object", "properties": { "city": { "type": "string" } } }
            }
        });
        let table = ReferenceTable::from_schema(&root);
        let expanded = expand_references(&root["properties"], &table).unwrap();
        assert_eq!(
            expanded["user"]["properties"]["address"]["properties"]["city"]["type"],
            "string"
        );
    }

    #[test]
    fn test_siblings_override_target() {
        let mut table = ReferenceTable::new();
        table.insert("name", json!({ "type": "string", "title": "Name" }));
        let expanded = expand_references(&json!({ "$ref": "name", "title": "Nickname" }), &table).unwrap();
        assert_eq!(expanded, json!({ "type": "string", "title": "Nickname" }));
    }

    #[test]
    fn test_unresolved_reference() {
        let table = ReferenceTable::new();
        let err = expand_references(&json!({ "$ref": "#/missing" }), &table).unwrap_err();
        assert_eq!(err, SchemaError::UnresolvedReference("#/missing".to_string()));
    }

    #[test]
    fn test_circular_reference() {
        let mut table = ReferenceTable::new();
        table.insert("a", json!({ "properties": { "b": { "$ref": "b" } } }));
        table.insert("b", json!({ "properties": { "a": { "$ref": "a" } } }));
        let err = expand_references(&json!({ "$ref": "a" }), &table).unwrap_err();
        assert_eq!(err.code(), "CIRCULAR_REFERENCE");
    }

    #[test]
    fn test_data_keywords_left_alone() {
        let table = ReferenceTable::new();
        let schema = json!({ "const": { "$ref": "not-a-schema" } });
        assert_eq!(expand_references(&schema, &table).unwrap(), schema);
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |pointer: &str| (pointer == "x").then(|| json!({ "type": "boolean" }));
        let expanded = expand_references(&json!({ "items": { "$ref": "x" } }), &resolver).unwrap();
        assert_eq!(expanded["items"]["type"], "boolean");
    }
}
