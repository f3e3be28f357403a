//! Schema normalisation for a single node
//!
//! Resolves the node's own level only: a top-level `$ref` is followed, `allOf`
//! is merged and `oneOf` variants are tagged. Child schemas are left raw and get
//! normalised when their nodes are created, which keeps recursive schemas finite.

use serde_json::{Map, Value};
use std::collections::HashSet;

use super::merge::merge_all_of_lenient;
use super::one_of::apply_variant_tags;
use super::reference::overlay;
use super::NormalizedSchema;
use crate::domain::{ReferenceResolver, SchemaError, SchemaResult};

/// Output of [`SchemaResolver::resolve`]
#[derive(Debug, Clone)]
pub struct Resolution {
    pub schema: NormalizedSchema,
    /// Non-fatal problems, e.g. skipped `allOf` entries
    pub diagnostics: Vec<SchemaError>,
}

/// Context for schema resolution, carrying the reference table
pub struct SchemaResolver<'a> {
    references: &'a dyn ReferenceResolver,
    /// Track visited refs to detect cycles
    visited_refs: HashSet<String>,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(references: &'a dyn ReferenceResolver) -> Self {
        Self {
            references,
            visited_refs: HashSet::new(),
        }
    }

    /// Normalise `schema` for the node that owns it.
    ///
    /// Unresolvable or circular references and unknown types are errors; an
    /// `allOf` entry that conflicts is dropped and reported as a diagnostic.
    pub fn resolve(&mut self, schema: &Value) -> SchemaResult<Resolution> {
        let expanded = self.expand_shallow(schema)?;
        let (mut merged, mut diagnostics) = merge_all_of_lenient(&expanded);

        if let Some(variants) = merged.get("oneOf").and_then(Value::as_array).cloned() {
            let mut normalized = Vec::with_capacity(variants.len());
            for variant in &variants {
                let variant = self.expand_shallow(variant)?;
                let (variant, errors) = merge_all_of_lenient(&variant);
                diagnostics.extend(errors);
                normalized.push(variant);
            }
            if let Some(obj) = merged.as_object_mut() {
                obj.insert("oneOf".to_string(), Value::Array(normalized));
            }
        }
        apply_variant_tags(&mut merged);

        let schema = NormalizedSchema::new(merged)?;
        Ok(Resolution {
            schema,
            diagnostics,
        })
    }

    /// Follow a top-level `$ref` chain, then do the same for each `allOf` entry
    fn expand_shallow(&mut self, schema: &Value) -> SchemaResult<Value> {
        let mut current = self.follow_top_level(schema)?;
        if let Some(entries) = current.get("allOf").and_then(Value::as_array).cloned() {
            let mut expanded = Vec::with_capacity(entries.len());
            for entry in &entries {
                expanded.push(self.expand_shallow(entry)?);
            }
            if let Some(obj) = current.as_object_mut() {
                obj.insert("allOf".to_string(), Value::Array(expanded));
            }
        }
        Ok(current)
    }

    fn follow_top_level(&mut self, schema: &Value) -> SchemaResult<Value> {
        let Some(obj) = schema.as_object() else {
            return Ok(schema.clone());
        };
        let Some(pointer) = obj.get("$ref").and_then(Value::as_str) else {
            return Ok(schema.clone());
        };
        let pointer = pointer.to_string();
        if !self.enter_ref(&pointer) {
            return Err(SchemaError::CircularReference(pointer));
        }
        let result = match self.references.resolve_reference(&pointer) {
            Some(target) => self.follow_top_level(&target),
            None => Err(SchemaError::UnresolvedReference(pointer.clone())),
        };
        self.exit_ref(&pointer);

        let siblings: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "$ref")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(overlay(result?, siblings))
    }

    /// Check if a ref has been visited (cycle detection)
    fn enter_ref(&mut self, ref_path: &str) -> bool {
        self.visited_refs.insert(ref_path.to_string())
    }

    /// Mark ref as no longer being processed
    fn exit_ref(&mut self, ref_path: &str) {
        self.visited_refs.remove(ref_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NodeKind, VARIANT_KEY};
    use crate::schema::ReferenceTable;
    use serde_json::json;

    #[test]
    fn test_resolve_simple_object() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer" }
            },
            "required": ["name"]
        });
        let table = ReferenceTable::from_schema(&schema);
        let resolved = SchemaResolver::new(&table).resolve(&schema).unwrap();

        assert_eq!(resolved.schema.kind(), NodeKind::Object);
        assert_eq!(resolved.schema.property_names(), vec!["name", "age"]);
        assert_eq!(resolved.schema.required(), vec!["name"]);
        assert!(resolved.diagnostics.is_empty());
    }

    #[test]
    fn test_resolve_with_ref_and_all_of() {
        let root = json!({
            "$defs": {
                "Named": { "properties": { "name": { "type": "string" } }, "required": ["name"] }
            }
        });
        let table = ReferenceTable::from_schema(&root);
        let schema = json!({
            "type": "object",
            "allOf": [{ "$ref": "#/$defs/Named" }, { "properties": { "age": { "type": "integer" } } }]
        });

        let resolved = SchemaResolver::new(&table).resolve(&schema).unwrap();
        assert!(resolved.schema.raw().get("allOf").is_none());
        assert_eq!(resolved.schema.property_names(), vec!["name", "age"]);
        assert_eq!(resolved.schema.required(), vec!["name"]);
    }

    #[test]
    fn test_resolve_tags_variants() {
        let schema = json!({
            "type": "object",
            "oneOf": [
                { "allOf": [{ "properties": { "a": { "type": "string" } } }] },
                { "properties": { "b": { "type": "string" } } }
            ]
        });
        let table = ReferenceTable::new();
        let resolved = SchemaResolver::new(&table).resolve(&schema).unwrap();
        let variants = resolved.schema.variants();
        assert_eq!(variants.len(), 2);
        assert!(variants[0].get("allOf").is_none());
        assert_eq!(variants[0]["properties"]["a"]["type"], "string");
        assert_eq!(variants[1]["properties"][VARIANT_KEY]["const"], 1);
    }

    #[test]
    fn test_conflicting_all_of_becomes_diagnostic() {
        let schema = json!({ "type": "string", "allOf": [{ "type": "number" }] });
        let table = ReferenceTable::new();
        let resolved = SchemaResolver::new(&table).resolve(&schema).unwrap();
        assert_eq!(resolved.schema.kind(), NodeKind::String);
        assert_eq!(resolved.diagnostics[0].code(), "ALL_OF_TYPE_REDEFINITION");
    }

    #[test]
    fn test_self_reference_cycle() {
        let mut table = ReferenceTable::new();
        table.insert("loop", json!({ "$ref": "loop" }));
        let err = SchemaResolver::new(&table)
            .resolve(&json!({ "$ref": "loop" }))
            .unwrap_err();
        assert_eq!(err.code(), "CIRCULAR_REFERENCE");
    }

    #[test]
    fn test_recursive_schema_resolves_one_level() {
        let root = json!({
            "$defs": {
                "Tree": {
                    "type": "object",
                    "properties": { "children": { "type": "array", "items": { "$ref": "#/$defs/Tree" } } }
                }
            }
        });
        let table = ReferenceTable::from_schema(&root);
        let resolved = SchemaResolver::new(&table)
            .resolve(&json!({ "$ref": "#/$defs/Tree" }))
            .unwrap();
        assert_eq!(resolved.schema.kind(), NodeKind::Object);
        let children = resolved.schema.property("children").unwrap();
        assert_eq!(children["items"]["$ref"], "#/$defs/Tree");
    }
}
