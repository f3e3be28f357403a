//! Value assignment, re-validation and computed-property propagation

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::build::{effective_properties, is_empty_value, variant_mismatch};
use super::{Form, NodeBody};
use crate::cascade::EventKind;
use crate::computed::ComputedKind;
use crate::domain::{NodeError, NodeId, NodeKind, NodePath, NodeResult, VARIANT_KEY};
use crate::validation::{self, error_set_hash, ValidationScope};

impl Form {
    // =========================================================================
    // Public mutations
    // =========================================================================

    /// Assign `value` to the node at `path`.
    ///
    /// On object and array nodes the whole subtree value is replaced: absent
    /// children are cleared, arrays are resized, undeclared properties are
    /// kept as passthrough data. A value of the wrong kind is accepted and
    /// surfaces as a validation error. On a virtual node the array elements
    /// are written back to the grouped sibling fields.
    pub fn set_value(&mut self, path: &str, value: Value) -> NodeResult<()> {
        let id = self.find(path)?;
        if let NodeBody::Virtual { fields } = &self.node(id)?.body {
            let fields = fields.clone();
            return self.distribute_virtual(id, path, &fields, value);
        }
        let mut changed = Vec::new();
        self.assign(id, Some(value), &mut changed);
        self.after_change(id, changed);
        Ok(())
    }

    /// Switch a `oneOf` node to variant `index`. Children exclusive to the old
    /// variant are destroyed and the new variant's children are built.
    pub fn select_variant(&mut self, path: &str, index: usize) -> NodeResult<()> {
        let id = self.find(path)?;
        let node = self.node(id)?;
        let count = node.schema.variants().len();
        if index >= count {
            return Err(NodeError::IllegalMutation {
                path: path.to_string(),
                reason: format!("variant {} out of range ({} variants)", index, count),
            });
        }
        if node.variant == Some(index) {
            return Ok(());
        }

        let mut changed = Vec::new();
        match self.node_value(id) {
            Some(Value::Object(mut current)) if matches!(node.body, NodeBody::Object { .. }) => {
                current.insert(VARIANT_KEY.to_string(), Value::from(index));
                self.assign(id, Some(Value::Object(current)), &mut changed);
            }
            _ => {
                self.set_variant(id, index, true);
                changed.push(id);
            }
        }
        self.after_change(id, changed);
        Ok(())
    }

    /// Append an item to the array at `path`; returns the new node
    pub fn push_item(&mut self, path: &str, value: Value) -> NodeResult<NodeId> {
        let id = self.find(path)?;
        let node = self.node(id)?;
        let NodeBody::Array { items, .. } = &node.body else {
            return Err(NodeError::IllegalMutation {
                path: path.to_string(),
                reason: format!("push_item on a {} node", node.kind()),
            });
        };
        let index = items.len();
        let item_schema = node.schema.items();
        let array_path = node.path.clone();

        let item = self.build_item(id, &item_schema, &array_path, index, value);
        if let Some(node) = self.arena.get_mut(id) {
            if let NodeBody::Array { items, foreign } = &mut node.body {
                items.push(item);
                *foreign = None;
            }
        }
        let item_path = array_path.push_index(index);
        self.publish_bubbling(id, EventKind::ChildAdded, json!({ "path": item_path.to_string() }));
        self.after_change(id, vec![id]);
        Ok(item)
    }

    /// Remove item `index` of the array at `path`. Later items shift down and
    /// the last slot is destroyed.
    pub fn remove_item(&mut self, path: &str, index: usize) -> NodeResult<()> {
        let id = self.find(path)?;
        let node = self.node(id)?;
        let NodeBody::Array { items, .. } = &node.body else {
            return Err(NodeError::IllegalMutation {
                path: path.to_string(),
                reason: format!("remove_item on a {} node", node.kind()),
            });
        };
        if index >= items.len() {
            return Err(NodeError::NotFound(node.path.push_index(index).to_string()));
        }
        let mut values: Vec<Value> = items
            .iter()
            .map(|item| self.node_value(*item).unwrap_or(Value::Null))
            .collect();
        values.remove(index);

        let mut changed = Vec::new();
        self.assign(id, Some(Value::Array(values)), &mut changed);
        self.after_change(id, changed);
        Ok(())
    }

    fn distribute_virtual(&mut self, id: NodeId, path: &str, fields: &[String], value: Value) -> NodeResult<()> {
        let Value::Array(values) = value else {
            return Err(NodeError::IllegalMutation {
                path: path.to_string(),
                reason: "a virtual node takes an array of field values".to_string(),
            });
        };
        let parent = self
            .node(id)?
            .path
            .parent()
            .ok_or_else(|| NodeError::IllegalMutation {
                path: path.to_string(),
                reason: "a virtual node needs a parent".to_string(),
            })?;
        for (index, field) in fields.iter().enumerate() {
            let Some(sibling) = self.find_path(&parent.push_property(field)) else {
                continue;
            };
            let mut changed = Vec::new();
            self.assign(sibling, values.get(index).cloned(), &mut changed);
            self.after_change(sibling, changed);
        }
        Ok(())
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Write `value` into the subtree of `id`; nodes whose value changed are
    /// appended to `changed`, children before parents
    pub(super) fn assign(&mut self, id: NodeId, value: Option<Value>, changed: &mut Vec<NodeId>) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        match &node.body {
            NodeBody::Virtual { .. } => {}
            NodeBody::Leaf { value: current } => {
                if *current == value {
                    return;
                }
                let reselect = node.schema.has_variants() && !node.schema.raw().is_boolean();
                let current_variant = node.variant;
                if let Some(node) = self.arena.get_mut(id) {
                    if let NodeBody::Leaf { value: current } = &mut node.body {
                        *current = value.clone();
                    }
                }
                if reselect {
                    let schema = node_schema(self, id);
                    if let Some(schema) = schema {
                        let (index, matched) = self.choose_variant(&schema, value.as_ref(), current_variant);
                        if let Some(node) = self.arena.get_mut(id) {
                            node.variant_issue = (!matched).then(|| variant_mismatch(&schema, &node.path));
                        }
                        if Some(index) != current_variant {
                            self.set_variant(id, index, false);
                        }
                    }
                }
                changed.push(id);
            }
            NodeBody::Object { .. } => {
                let before = self.node_value(id);
                self.assign_object(id, value, changed);
                if self.node_value(id) != before {
                    changed.push(id);
                }
            }
            NodeBody::Array { .. } => {
                let before = self.node_value(id);
                self.assign_array(id, value, changed);
                if self.node_value(id) != before {
                    changed.push(id);
                }
            }
        }
    }

    fn assign_object(&mut self, id: NodeId, value: Option<Value>, changed: &mut Vec<NodeId>) {
        let (obj, foreign) = match value {
            Some(Value::Object(map)) => (map, None),
            Some(other) => (Map::new(), Some(other)),
            None => (Map::new(), None),
        };

        let Some(node) = self.arena.get(id) else {
            return;
        };
        if node.schema.has_variants() && foreign.is_none() {
            let current = node.variant;
            if let Some(schema) = node_schema(self, id) {
                let candidate = Value::Object(obj.clone());
                let (index, matched) = self.choose_variant(&schema, Some(&candidate), current);
                if Some(index) != current {
                    self.switch_variant(id, index, &obj);
                }
                if let Some(node) = self.arena.get_mut(id) {
                    node.variant_issue = (!matched).then(|| variant_mismatch(&schema, &node.path));
                }
            }
        }

        let children: Vec<(String, NodeId)> = match self.arena.get(id).map(|n| &n.body) {
            Some(NodeBody::Object { children, .. }) => children.clone(),
            _ => return,
        };
        for (name, child) in &children {
            self.assign(*child, obj.get(name).cloned(), changed);
        }

        let Some(schema) = node_schema(self, id) else {
            return;
        };
        let variant = self.arena.get(id).and_then(|n| n.variant);
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        let extra = self.passthrough(&schema, variant, &names, &obj);
        if let Some(node) = self.arena.get_mut(id) {
            if let NodeBody::Object {
                extra: current_extra,
                foreign: current_foreign,
                ..
            } = &mut node.body
            {
                *current_extra = extra;
                *current_foreign = foreign;
            }
        }
    }

    fn assign_array(&mut self, id: NodeId, value: Option<Value>, changed: &mut Vec<NodeId>) {
        let (values, foreign) = match value {
            Some(Value::Array(values)) => (values, None),
            Some(other) => (Vec::new(), Some(other)),
            None => (Vec::new(), None),
        };
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let NodeBody::Array { items: current, .. } = &node.body else {
            return;
        };
        let current = current.clone();
        let item_schema = node.schema.items();
        let array_path = node.path.clone();

        let keep = current.len().min(values.len());
        for item in current[keep..].iter().rev() {
            self.destroy_subtree(*item);
        }
        let mut items: Vec<NodeId> = current[..keep].to_vec();
        for (index, item_value) in values.into_iter().enumerate() {
            if index < keep {
                self.assign(items[index], Some(item_value), changed);
            } else {
                let item = self.build_item(id, &item_schema, &array_path, index, item_value);
                items.push(item);
                let item_path = array_path.push_index(index);
                self.publish_bubbling(id, EventKind::ChildAdded, json!({ "path": item_path.to_string() }));
            }
        }
        if let Some(node) = self.arena.get_mut(id) {
            node.body = NodeBody::Array { items, foreign };
        }
    }

    /// Rebuild the children that differ between the current variant and `next`
    fn switch_variant(&mut self, id: NodeId, next: usize, obj: &Map<String, Value>) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let previous = node.variant;
        let path = node.path.clone();
        let schema = node.schema.clone();
        let old_children: Vec<(String, NodeId)> = match &node.body {
            NodeBody::Object { children, .. } => children.clone(),
            _ => Vec::new(),
        };
        let old_props = effective_properties(&schema, previous);
        let new_props = effective_properties(&schema, Some(next));

        let mut kept = Vec::new();
        for (name, child) in old_children {
            let old_schema = old_props.iter().find(|(n, _)| *n == name).map(|(_, s)| s);
            let new_schema = new_props.iter().find(|(n, _)| *n == name).map(|(_, s)| s);
            match new_schema {
                Some(schema) if Some(schema) == old_schema => kept.push((name, child)),
                _ => self.destroy_subtree(child),
            }
        }

        let mut children = Vec::with_capacity(new_props.len());
        for (name, child_schema) in &new_props {
            if let Some((_, child)) = kept.iter().find(|(n, _)| n == name) {
                children.push((name.clone(), *child));
                continue;
            }
            let child_path = path.push_property(name);
            let prepared = self.prepare_child(child_schema, &child_path);
            let child = self.build_node(prepared, obj.get(name).cloned(), Some(id), child_path.clone());
            children.push((name.clone(), child));
            self.publish_bubbling(id, EventKind::ChildAdded, json!({ "path": child_path.to_string() }));
        }
        self.prune_virtual_fields(&children);
        if let Some(node) = self.arena.get_mut(id) {
            if let NodeBody::Object { children: current, .. } = &mut node.body {
                *current = children;
            }
        }
        self.set_variant(id, next, false);
        debug!(path = %path, from = ?previous, to = next, "Switched oneOf variant");
    }

    /// Record the active variant, recompile the validator and announce it
    fn set_variant(&mut self, id: NodeId, index: usize, clear_issue: bool) {
        let Some(schema) = node_schema(self, id) else {
            return;
        };
        let (local_schema, validator) = self.compile_validator(&schema, Some(index), None, false);
        if let Some(node) = self.arena.get_mut(id) {
            node.variant = Some(index);
            node.local_schema = local_schema;
            node.validator = validator;
            if clear_issue {
                node.variant_issue = None;
            }
        }
        self.publish_bubbling(id, EventKind::VariantChanged, json!(index));
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    /// Re-validate and notify after the subtree of `target` was written
    pub(super) fn after_change(&mut self, target: NodeId, changed: Vec<NodeId>) {
        let ancestors = self.ancestor_ids(target);

        let mut validity_changed = Vec::new();
        for id in self.post_order(target) {
            if self.revalidate(id) {
                validity_changed.push(id);
            }
        }
        self.refresh_conditionals(target);
        for ancestor in &ancestors {
            self.refresh_conditionals(*ancestor);
            if self.revalidate(*ancestor) {
                validity_changed.push(*ancestor);
            }
        }

        for id in &changed {
            let Some(path) = self.arena.get(*id).map(|n| n.path.clone()) else {
                continue;
            };
            let value = self.node_value(*id).unwrap_or(Value::Null);
            self.cascade.publish(path.clone(), EventKind::ValueChanged, value);
            self.invalidate_dependents(&path);
            self.invalidate_own(*id);
            self.notify_virtual_groups(*id);
        }
        if !changed.is_empty() {
            for ancestor in &ancestors {
                let Some(path) = self.arena.get(*ancestor).map(|n| n.path.clone()) else {
                    continue;
                };
                let value = self.node_value(*ancestor).unwrap_or(Value::Null);
                self.cascade.publish(path, EventKind::ValueChanged, value);
            }
        }

        for id in validity_changed {
            self.publish_validity(id);
        }
    }

    /// Run the node's validator. Returns true when its error set changed.
    pub(super) fn revalidate(&mut self, id: NodeId) -> bool {
        let Some(node) = self.arena.get(id) else {
            return false;
        };
        let value = self.node_value(id);
        let mut issues = match value {
            None if !node.validator.is_fallback() => Vec::new(),
            value => {
                let instance = value.unwrap_or(Value::Null);
                let mut scope = ValidationScope::new(&node.path);
                scope.messages = node.schema.error_messages();
                scope.locale = self.settings.validation.locale.as_deref();
                for (name, property) in node.schema.properties() {
                    if let Some(messages) = property.get("errorMessages").and_then(Value::as_object) {
                        scope.property_messages.insert(name, messages);
                    }
                }
                validation::validate(&node.validator, &node.local_schema, &instance, &scope)
            }
        };
        if let Some(issue) = &node.variant_issue {
            issues.push(issue.clone());
        }
        let hash = error_set_hash(&issues);
        let Some(node) = self.arena.get_mut(id) else {
            return false;
        };
        node.errors = issues;
        if node.error_hash == hash {
            return false;
        }
        node.error_hash = hash;
        true
    }

    /// Re-evaluate the `if` of a conditional object and (de)activate the
    /// children its branches govern
    pub(super) fn refresh_conditionals(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let (Some(conditional), Some(condition)) = (node.schema.conditional(), node.condition.as_ref()) else {
            return;
        };
        let NodeBody::Object { children, .. } = &node.body else {
            return;
        };
        let value = self.node_value(id).unwrap_or(Value::Null);
        let branch = match condition.is_valid(&value) {
            Some(true) => Some(&conditional.then_fields),
            Some(false) => Some(&conditional.else_fields),
            None => None,
        };
        let governed = conditional.governed();
        let updates: Vec<(NodeId, bool)> = children
            .iter()
            .map(|(name, child)| {
                let active = !governed.contains(name) || branch.map(|b| b.contains(name)).unwrap_or(true);
                (*child, active)
            })
            .collect();

        for (child, active) in updates {
            let Some(node) = self.arena.get_mut(child) else {
                continue;
            };
            if node.active == active {
                continue;
            }
            node.active = active;
            let path = node.path.clone();
            let snapshot = node.computed.snapshot(active);
            self.cascade
                .publish(path, EventKind::ComputedChanged, json!(snapshot));
        }
    }

    /// Mark dirty every computed property whose dependencies overlap `path`
    pub(super) fn invalidate_dependents(&mut self, path: &NodePath) {
        let watching: Vec<NodeId> = self
            .watchers
            .iter()
            .filter(|(dep, _)| dep.overlaps(path))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        for id in watching {
            if let Some(node) = self.arena.get_mut(id) {
                if node.computed.invalidate(path) {
                    self.dirty.insert(id);
                }
            }
        }
    }

    fn invalidate_own(&mut self, id: NodeId) {
        if let Some(node) = self.arena.get_mut(id) {
            if node.computed.invalidate_own() {
                self.dirty.insert(id);
            }
        }
    }

    /// Virtual siblings grouping a changed field change with it
    fn notify_virtual_groups(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let Some(name) = node.path.last().map(|s| s.to_string()) else {
            return;
        };
        let Some(parent) = node.parent.and_then(|p| self.arena.get(p)) else {
            return;
        };
        let NodeBody::Object { children, .. } = &parent.body else {
            return;
        };
        let groups: Vec<NodeId> = children
            .iter()
            .filter_map(|(_, child)| {
                let child_node = self.arena.get(*child)?;
                match &child_node.body {
                    NodeBody::Virtual { fields } if fields.contains(&name) => Some(*child),
                    _ => None,
                }
            })
            .collect();
        for group in groups {
            let Some(path) = self.arena.get(group).map(|n| n.path.clone()) else {
                continue;
            };
            let value = self.node_value(group).unwrap_or(Value::Null);
            self.cascade.publish(path.clone(), EventKind::ValueChanged, value);
            self.invalidate_dependents(&path);
        }
    }

    /// Publish at the node and at every ancestor
    pub(super) fn publish_bubbling(&mut self, id: NodeId, kind: EventKind, payload: Value) {
        let mut current = Some(id);
        while let Some(nid) = current {
            let Some(node) = self.arena.get(nid) else {
                return;
            };
            let path = node.path.clone();
            current = node.parent;
            self.cascade.publish(path, kind, payload.clone());
        }
    }

    fn publish_validity(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(nid) = current {
            let Some(node) = self.arena.get(nid) else {
                return;
            };
            let path = node.path.clone();
            current = node.parent;
            let errors = self.errors_for(nid);
            let payload = json!({ "valid": errors.is_empty(), "errors": errors });
            self.cascade.publish(path, EventKind::ValidityChanged, payload);
        }
    }

    // =========================================================================
    // Computed properties
    // =========================================================================

    /// Evaluate dirty computed properties until none are left, applying
    /// computed defaults as they change
    pub(super) fn settle(&mut self) {
        let passes = self.settings.cascade.max_flush_passes.max(1);
        for _ in 0..passes {
            let dirty: Vec<NodeId> = std::mem::take(&mut self.dirty).into_iter().collect();
            if dirty.is_empty() {
                return;
            }
            for id in dirty {
                if !self.arena.contains(id) {
                    continue;
                }
                if self.evaluate_computed(id, true) {
                    self.publish_computed(id);
                }
                self.apply_computed_default(id);
            }
        }
        if !self.dirty.is_empty() {
            warn!(remaining = self.dirty.len(), passes, "Computed properties still dirty after flush passes");
        }
    }

    /// Lazy read path: evaluate dirty flags and watches, leave `default` to flush
    pub(super) fn refresh_computed(&mut self, id: NodeId) {
        if !self.dirty.contains(&id) {
            return;
        }
        if self.evaluate_computed(id, false) {
            self.publish_computed(id);
        }
        let still_dirty = self
            .arena
            .get(id)
            .map(|n| n.computed.has_dirty())
            .unwrap_or(false);
        if !still_dirty {
            self.dirty.remove(&id);
        }
    }

    /// Returns true when any cached value changed
    fn evaluate_computed(&mut self, id: NodeId, include_default: bool) -> bool {
        let Some(node) = self.arena.get(id) else {
            return false;
        };
        let own = self.node_value(id);
        let inputs: Vec<(ComputedKind, Vec<Value>)> = node
            .computed
            .dirty_kinds()
            .into_iter()
            .filter(|kind| include_default || *kind != ComputedKind::Default)
            .map(|kind| {
                let deps = node
                    .computed
                    .get(kind)
                    .map(|p| p.dependencies().to_vec())
                    .unwrap_or_default();
                let values = deps
                    .iter()
                    .map(|dep| self.value_at(dep).unwrap_or(Value::Null))
                    .collect();
                (kind, values)
            })
            .collect();

        let engine = &self.engine;
        let Some(node) = self.arena.get_mut(id) else {
            return false;
        };
        let mut changed = false;
        for (kind, values) in inputs {
            if let Some(property) = node.computed.get_mut(kind) {
                changed |= property.evaluate(engine, &values, own.as_ref());
            }
        }
        changed
    }

    fn publish_computed(&mut self, id: NodeId) {
        if let Some(node) = self.arena.get(id) {
            let snapshot = node.computed.snapshot(node.active);
            self.cascade
                .publish(node.path.clone(), EventKind::ComputedChanged, json!(snapshot));
        }
    }

    /// Write the computed default while the node is empty or still holds the
    /// previously applied default
    fn apply_computed_default(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let Some(default) = node
            .computed
            .get(ComputedKind::Default)
            .map(|p| p.cached().clone())
        else {
            return;
        };
        if default.is_null() || node.kind() == NodeKind::Virtual {
            return;
        }
        let current = self.node_value(id);
        let untouched = current.as_ref().map(is_empty_value).unwrap_or(true) || current == node.applied_default;
        if !untouched || current.as_ref() == Some(&default) {
            return;
        }
        let mut changed = Vec::new();
        self.assign(id, Some(default.clone()), &mut changed);
        if let Some(node) = self.arena.get_mut(id) {
            node.applied_default = Some(default);
        }
        self.after_change(id, changed);
    }
}

fn node_schema(form: &Form, id: NodeId) -> Option<crate::schema::NormalizedSchema> {
    form.arena.get(id).map(|n| n.schema.clone())
}
