//! Node construction and destruction

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{Form, Node, NodeBody};
use crate::cascade::EventKind;
use crate::computed::ComputedSet;
use crate::domain::{NodeId, NodeKind, NodePath, SchemaError, SchemaResult, ValidationIssue, VARIANT_KEY};
use crate::schema::merge::merge_into;
use crate::schema::one_of::{is_tagged, match_discriminant, variant_property_names};
use crate::schema::{expand_references, NormalizedSchema, SchemaResolver};
use crate::validation::NodeValidator;

/// A resolved schema ready to become a node
pub(super) struct Prepared {
    schema: NormalizedSchema,
    diagnostics: Vec<SchemaError>,
    /// Set when resolution failed; the node gets a fallback validator
    broken: Option<String>,
    /// Degraded node: a plain leaf holding whatever value it is given
    inert: bool,
}

impl Prepared {
    fn inert(error: SchemaError, broken: Option<String>) -> Self {
        Self {
            schema: NormalizedSchema::inert(),
            diagnostics: vec![error],
            broken,
            inert: true,
        }
    }
}

impl Form {
    /// Normalise a schema for a node; errors are fatal only for the root
    pub(super) fn prepare(&self, raw: &Value) -> SchemaResult<Prepared> {
        let resolution = SchemaResolver::new(self.references.as_ref()).resolve(raw)?;
        Ok(Prepared {
            schema: resolution.schema,
            diagnostics: resolution.diagnostics,
            broken: None,
            inert: false,
        })
    }

    pub(super) fn prepare_child(&self, raw: &Value, path: &NodePath) -> Prepared {
        let max_depth = self.settings.resolver.max_depth;
        if path.depth() > max_depth {
            warn!(path = %path, max_depth, "Schema nesting too deep, node degraded");
            return Prepared::inert(SchemaError::MaxDepthExceeded(max_depth), None);
        }
        match self.prepare(raw) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(path = %path, error = %err, "Schema resolution failed, node degraded");
                let message = err.to_string();
                Prepared::inert(err, Some(message))
            }
        }
    }

    /// Build a node and its subtree. The node is validated before returning;
    /// no events are published for it.
    pub(super) fn build_node(&mut self, prepared: Prepared, value: Option<Value>, parent: Option<NodeId>, path: NodePath) -> NodeId {
        let id = self.arena.allocate();
        let Prepared {
            schema,
            mut diagnostics,
            broken,
            inert,
        } = prepared;
        let kind = schema.kind();
        let value = value
            .or_else(|| schema.default_value().cloned())
            .or_else(|| kind.empty_value());

        let mut variant = None;
        let mut variant_issue = None;
        if schema.has_variants() && !inert {
            let (index, matched) = self.choose_variant(&schema, value.as_ref(), None);
            variant = Some(index);
            if !matched {
                variant_issue = Some(variant_mismatch(&schema, &path));
            }
        }

        let body = if inert {
            NodeBody::Leaf { value }
        } else {
            match kind {
                NodeKind::Object => self.build_object_body(id, &schema, variant, value, &path),
                NodeKind::Array => self.build_array_body(id, &schema, value, &path),
                NodeKind::Virtual => NodeBody::Virtual {
                    fields: schema.virtual_fields(),
                },
                _ => NodeBody::Leaf { value },
            }
        };

        let (local_schema, validator) = self.compile_validator(&schema, variant, broken, inert);
        let condition = schema.conditional().map(|c| {
            match expand_references(&c.condition, self.references.as_ref()) {
                Ok(expanded) => NodeValidator::compile(&expanded),
                Err(err) => NodeValidator::fallback(err.to_string()),
            }
        });
        let (computed, computed_errors) = ComputedSet::from_schema(&schema, &path, &self.engine);
        diagnostics.extend(computed_errors);

        for dep in computed.all_dependencies() {
            self.watchers.entry(dep.clone()).or_default().insert(id);
        }
        if !computed.is_empty() {
            self.dirty.insert(id);
        }

        self.arena.fill(Node {
            id,
            parent,
            path,
            schema,
            body,
            variant,
            variant_issue,
            local_schema,
            validator,
            condition,
            errors: Vec::new(),
            error_hash: String::new(),
            computed,
            diagnostics,
            applied_default: None,
            active: true,
        });
        self.refresh_conditionals(id);
        self.revalidate(id);
        id
    }

    fn build_object_body(&mut self, id: NodeId, schema: &NormalizedSchema, variant: Option<usize>, value: Option<Value>, path: &NodePath) -> NodeBody {
        let (obj, foreign) = match value {
            Some(Value::Object(map)) => (map, None),
            Some(other) => (Map::new(), Some(other)),
            None => (Map::new(), None),
        };
        let properties = effective_properties(schema, variant);
        let mut children = Vec::with_capacity(properties.len());
        for (name, child_schema) in &properties {
            let child_path = path.push_property(name);
            let prepared = self.prepare_child(child_schema, &child_path);
            let child = self.build_node(prepared, obj.get(name).cloned(), Some(id), child_path);
            children.push((name.clone(), child));
        }
        self.prune_virtual_fields(&children);
        let names: Vec<&str> = properties.iter().map(|(n, _)| n.as_str()).collect();
        let extra = self.passthrough(schema, variant, &names, &obj);
        NodeBody::Object {
            children,
            extra,
            foreign,
        }
    }

    /// Virtual children may only group plain siblings. Entries naming the
    /// node itself or another virtual sibling are dropped with a diagnostic.
    pub(super) fn prune_virtual_fields(&mut self, children: &[(String, NodeId)]) {
        let virtual_names: Vec<&str> = children
            .iter()
            .filter(|(_, child)| {
                matches!(self.arena.get(*child).map(|n| &n.body), Some(NodeBody::Virtual { .. }))
            })
            .map(|(name, _)| name.as_str())
            .collect();
        if virtual_names.is_empty() {
            return;
        }

        for (name, child) in children {
            let Some(node) = self.arena.get_mut(*child) else {
                continue;
            };
            let NodeBody::Virtual { fields } = &mut node.body else {
                continue;
            };
            let (kept, dropped): (Vec<String>, Vec<String>) = fields
                .drain(..)
                .partition(|field| !virtual_names.contains(&field.as_str()));
            *fields = kept;
            for field in dropped {
                let reason = if &field == name {
                    format!("'{}' cannot group itself", name)
                } else {
                    format!("'{}' cannot group the virtual field '{}'", name, field)
                };
                warn!(path = %node.path, field = %field, "Dropping virtual field");
                node.diagnostics.push(SchemaError::InvalidKeyword {
                    keyword: "fields".to_string(),
                    reason,
                });
            }
        }
    }

    fn build_array_body(&mut self, id: NodeId, schema: &NormalizedSchema, value: Option<Value>, path: &NodePath) -> NodeBody {
        let values = match value {
            Some(Value::Array(values)) => values,
            Some(other) => {
                return NodeBody::Array {
                    items: Vec::new(),
                    foreign: Some(other),
                }
            }
            None => Vec::new(),
        };
        let item_schema = schema.items();
        let mut items = Vec::with_capacity(values.len());
        for (index, item) in values.into_iter().enumerate() {
            items.push(self.build_item(id, &item_schema, path, index, item));
        }
        NodeBody::Array {
            items,
            foreign: None,
        }
    }

    pub(super) fn build_item(&mut self, array: NodeId, item_schema: &Value, array_path: &NodePath, index: usize, value: Value) -> NodeId {
        let item_path = array_path.push_index(index);
        let prepared = self.prepare_child(item_schema, &item_path);
        self.build_node(prepared, Some(value), Some(array), item_path)
    }

    /// Undeclared entries of `obj` kept as passthrough data. Properties that
    /// belong only to a non-selected variant are dropped unless allow-listed.
    pub(super) fn passthrough(&self, schema: &NormalizedSchema, variant: Option<usize>, declared: &[&str], obj: &Map<String, Value>) -> Map<String, Value> {
        let mut exclusive: Vec<String> = Vec::new();
        for (index, other) in schema.variants().iter().enumerate() {
            if Some(index) == variant {
                continue;
            }
            for name in variant_property_names(other) {
                if !declared.contains(&name.as_str()) && !exclusive.contains(&name) {
                    exclusive.push(name);
                }
            }
        }
        let preserve = &self.settings.one_of.preserve_properties;
        obj.iter()
            .filter(|(key, _)| key.as_str() != VARIANT_KEY && !declared.contains(&key.as_str()))
            .filter(|(key, _)| !exclusive.contains(key) || preserve.contains(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Local schema and validator for a node
    pub(super) fn compile_validator(&self, schema: &NormalizedSchema, variant: Option<usize>, broken: Option<String>, inert: bool) -> (Value, NodeValidator) {
        if let Some(error) = broken {
            return (Value::Bool(true), NodeValidator::fallback(error));
        }
        if inert || !self.settings.validation.enabled || schema.kind() == NodeKind::Virtual {
            return (Value::Bool(true), NodeValidator::AcceptAll);
        }
        let local = schema.local_schema(variant);
        match expand_references(&local, self.references.as_ref()) {
            Ok(expanded) => {
                let validator = NodeValidator::compile(&expanded);
                (expanded, validator)
            }
            Err(err) => {
                warn!(error = %err, "Local schema has unresolvable references");
                (local, NodeValidator::fallback(err.to_string()))
            }
        }
    }

    /// Pick the `oneOf` variant for `value`.
    ///
    /// Tagged variants are matched on the discriminant alone. Without a
    /// discriminant the `current` variant is kept; a fresh node with an empty
    /// value takes variant 0, otherwise the first variant the value fully
    /// satisfies. Returns `(index, matched)`; an unmatched value gets variant 0.
    pub(super) fn choose_variant(&self, schema: &NormalizedSchema, value: Option<&Value>, current: Option<usize>) -> (usize, bool) {
        let variants = schema.variants();
        if variants.iter().any(is_tagged) {
            if let Some(value) = value {
                if let Some(index) = match_discriminant(variants, value) {
                    return (index, true);
                }
                if value.get(VARIANT_KEY).is_some() {
                    return (0, false);
                }
            }
            if let Some(current) = current {
                return (current, true);
            }
            if value.map(is_empty_value).unwrap_or(true) {
                return (0, true);
            }
        }
        match value {
            Some(value) => {
                for index in 0..variants.len() {
                    if self.variant_accepts(schema, index, value) {
                        return (index, true);
                    }
                }
                (0, false)
            }
            None => (current.unwrap_or(0), true),
        }
    }

    /// Full validation of `value` against base + variant, ignoring the discriminant
    fn variant_accepts(&self, schema: &NormalizedSchema, index: usize, value: &Value) -> bool {
        let Some(chosen) = schema.variants().get(index) else {
            return false;
        };
        let mut full = schema.raw().clone();
        if let Some(obj) = full.as_object_mut() {
            obj.remove("oneOf");
        }
        if merge_into(&mut full, chosen).is_err() {
            return false;
        }
        if let Some(obj) = full.as_object_mut() {
            if let Some(Value::Object(props)) = obj.get_mut("properties") {
                props.remove(VARIANT_KEY);
            }
            if let Some(Value::Array(required)) = obj.get_mut("required") {
                required.retain(|r| r.as_str() != Some(VARIANT_KEY));
            }
        }
        let Ok(expanded) = expand_references(&full, self.references.as_ref()) else {
            return false;
        };
        NodeValidator::compile(&expanded)
            .is_valid(value)
            .unwrap_or(false)
    }

    /// Destroy a subtree children-first, cancel its listeners and queued
    /// events, and invalidate computed properties that depended on it.
    /// The caller removes the id from the parent body.
    pub(super) fn destroy_subtree(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let path = node.path.clone();
        let parent = node.parent;

        for nid in self.post_order(id) {
            let Some(removed) = self.arena.release(nid) else {
                continue;
            };
            for dep in removed.computed.all_dependencies() {
                if let Some(ids) = self.watchers.get_mut(dep) {
                    ids.remove(&nid);
                    if ids.is_empty() {
                        self.watchers.remove(dep);
                    }
                }
            }
            self.dirty.remove(&nid);
        }
        self.cascade.cancel(&path);
        self.invalidate_dependents(&path);
        if let Some(parent) = parent {
            self.publish_bubbling(parent, EventKind::ChildRemoved, json!({ "path": path.to_string() }));
        }
        debug!(path = %path, "Destroyed node subtree");
    }
}

/// Base properties followed by those the active variant adds; a property in
/// both gets the variant's constraints merged in
pub(super) fn effective_properties(schema: &NormalizedSchema, variant: Option<usize>) -> Vec<(String, Value)> {
    let mut properties: Vec<(String, Value)> = schema
        .properties()
        .into_iter()
        .map(|(name, s)| (name.to_string(), s.clone()))
        .collect();
    let chosen = variant.and_then(|i| schema.variants().get(i));
    if let Some(variant_props) = chosen.and_then(|v| v.get("properties")).and_then(Value::as_object) {
        for (name, variant_schema) in variant_props {
            if name == VARIANT_KEY {
                continue;
            }
            match properties.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => {
                    let mut merged = existing.clone();
                    *existing = match merge_into(&mut merged, variant_schema) {
                        Ok(()) => merged,
                        Err(_) => variant_schema.clone(),
                    };
                }
                None => properties.push((name.clone(), variant_schema.clone())),
            }
        }
    }
    properties
}

pub(super) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.keys().all(|k| k == VARIANT_KEY),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

pub(super) fn variant_mismatch(schema: &NormalizedSchema, path: &NodePath) -> ValidationIssue {
    let mut params = Map::new();
    params.insert("variants".to_string(), Value::from(schema.variants().len()));
    ValidationIssue {
        schema_path: "#/oneOf".to_string(),
        instance_path: path.to_string(),
        keyword: "oneOf".to_string(),
        message: "Value does not match any oneOf variant".to_string(),
        params,
    }
}
