//! Node Graph
//!
//! [`Form`] owns the live tree. Nodes sit in an arena and refer to each other
//! by [`NodeId`]; a node owns its children through its body and keeps a
//! non-owning parent handle that is only used to compute paths and bubble
//! events upward. Lookups always walk down from the root.
//!
//! Mutations (`set_value`, `push_item`, `select_variant`, ...) run
//! synchronously: values, validation and structure are up to date when they
//! return. Notifications are queued on the [`EventCascade`] and delivered by
//! [`Form::flush`], which also re-evaluates dirty computed properties.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

mod arena;
mod build;
mod update;

use arena::Arena;

use crate::cascade::{EventCascade, NodeEvent, Subscription};
use crate::computed::{ComputedKind, ComputedSet, ExpressionEngine};
use crate::config::EngineSettings;
use crate::domain::{
    ComputedSnapshot, FormResult, NodeError, NodeId, NodeKind, NodePath, NodeResult, NodeSnapshot,
    PathSegment, ReferenceResolver, SchemaError, ValidationIssue,
};
use crate::schema::one_of::strip_discriminants;
use crate::schema::{NormalizedSchema, ReferenceTable};
use crate::validation::NodeValidator;

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug)]
pub(crate) enum NodeBody {
    Leaf {
        value: Option<Value>,
    },
    Object {
        /// Declared properties in schema order
        children: Vec<(String, NodeId)>,
        /// Undeclared properties carried through untouched
        extra: Map<String, Value>,
        /// A non-object value assigned to an object node
        foreign: Option<Value>,
    },
    Array {
        items: Vec<NodeId>,
        /// A non-array value assigned to an array node
        foreign: Option<Value>,
    },
    Virtual {
        fields: Vec<String>,
    },
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) path: NodePath,
    pub(crate) schema: NormalizedSchema,
    pub(crate) body: NodeBody,
    pub(crate) variant: Option<usize>,
    /// Raised when the value matches no `oneOf` variant
    pub(crate) variant_issue: Option<ValidationIssue>,
    pub(crate) local_schema: Value,
    pub(crate) validator: NodeValidator,
    /// Compiled `if` of a conditional object schema
    pub(crate) condition: Option<NodeValidator>,
    pub(crate) errors: Vec<ValidationIssue>,
    pub(crate) error_hash: String,
    pub(crate) computed: ComputedSet,
    pub(crate) diagnostics: Vec<SchemaError>,
    /// Last value written by a computed `default`
    pub(crate) applied_default: Option<Value>,
    /// False for conditional children outside the selected branch
    pub(crate) active: bool,
}

impl Node {
    pub(crate) fn kind(&self) -> NodeKind {
        self.schema.kind()
    }

    pub(crate) fn child(&self, segment: &PathSegment) -> Option<NodeId> {
        match (&self.body, segment) {
            (NodeBody::Object { children, .. }, PathSegment::Property(name)) => children
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id),
            (NodeBody::Object { children, .. }, PathSegment::Index(idx)) => {
                let name = idx.to_string();
                children.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
            }
            (NodeBody::Array { items, .. }, PathSegment::Index(idx)) => items.get(*idx).copied(),
            _ => None,
        }
    }

    pub(crate) fn child_ids(&self) -> Vec<NodeId> {
        match &self.body {
            NodeBody::Object { children, .. } => children.iter().map(|(_, id)| *id).collect(),
            NodeBody::Array { items, .. } => items.clone(),
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Form
// =============================================================================

/// A live form built from a JSON Schema
pub struct Form {
    arena: Arena,
    root: NodeId,
    references: Box<dyn ReferenceResolver>,
    engine: ExpressionEngine,
    cascade: EventCascade,
    settings: EngineSettings,
    /// Dependency path -> nodes with a computed property watching it
    watchers: BTreeMap<NodePath, BTreeSet<NodeId>>,
    /// Nodes with computed properties awaiting evaluation
    dirty: BTreeSet<NodeId>,
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Form")
            .field("root", &self.root)
            .field("nodes", &self.arena.len())
            .field("cascade", &self.cascade)
            .finish()
    }
}

impl Form {
    /// Build a form whose `$ref`s resolve into `schema` itself
    pub fn new(schema: Value, initial: Option<Value>) -> FormResult<Self> {
        let references = ReferenceTable::from_schema(&schema);
        Self::with_resolver(schema, initial, references, EngineSettings::default())
    }

    /// Build a form with settings; `resolver.reference_dirs` are loaded into
    /// the reference table next to the root document
    pub fn from_settings(schema: Value, initial: Option<Value>, settings: EngineSettings) -> anyhow::Result<Self> {
        let mut references = ReferenceTable::from_schema(&schema);
        for dir in &settings.resolver.reference_dirs {
            references.load_dir(dir)?;
        }
        Ok(Self::with_resolver(schema, initial, references, settings)?)
    }

    /// Build a form with a caller-supplied reference resolver.
    ///
    /// Fails only when the root schema itself cannot be resolved or has no
    /// determinable kind; problems further down degrade the affected node.
    pub fn with_resolver<R>(schema: Value, initial: Option<Value>, references: R, settings: EngineSettings) -> FormResult<Self>
    where
        R: ReferenceResolver + 'static,
    {
        let mut form = Self {
            arena: Arena::default(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            references: Box::new(references),
            engine: ExpressionEngine::new(&settings.expressions),
            cascade: EventCascade::new(),
            settings,
            watchers: BTreeMap::new(),
            dirty: BTreeSet::new(),
        };
        let prepared = form.prepare(&schema)?;
        form.root = form.build_node(prepared, initial, None, NodePath::root());
        form.settle();
        // nothing can be subscribed yet
        form.cascade.deliver();
        debug!(nodes = form.arena.len(), "Form built");
        Ok(form)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Locate the node at `path` (`a.b[2].c`)
    pub fn find(&self, path: &str) -> NodeResult<NodeId> {
        let parsed = NodePath::parse(path)?;
        self.find_path(&parsed)
            .ok_or_else(|| NodeError::NotFound(path.to_string()))
    }

    /// Current path of a node handle
    pub fn path_of(&self, id: NodeId) -> NodeResult<NodePath> {
        self.arena
            .get(id)
            .map(|node| node.path.clone())
            .ok_or_else(|| NodeError::Stale(id.to_string()))
    }

    pub fn kind(&self, path: &str) -> NodeResult<NodeKind> {
        let id = self.find(path)?;
        Ok(self.node(id)?.kind())
    }

    /// Value of the node at `path`; `None` for an empty leaf
    pub fn value(&self, path: &str) -> NodeResult<Option<Value>> {
        let id = self.find(path)?;
        Ok(self.node_value(id))
    }

    /// The whole form value without reserved discriminant keys
    pub fn export_value(&self) -> Value {
        self.node_value(self.root)
            .map(|v| strip_discriminants(&v))
            .unwrap_or(Value::Null)
    }

    /// Errors of the node, its descendants, and ancestor errors pointing into it
    pub fn errors(&self, path: &str) -> NodeResult<Vec<ValidationIssue>> {
        let id = self.find(path)?;
        Ok(self.errors_for(id))
    }

    /// True when the whole form validates
    pub fn is_valid(&self) -> bool {
        self.errors_for(self.root).is_empty()
    }

    /// Schema problems recorded while building the node
    pub fn diagnostics(&self, path: &str) -> NodeResult<Vec<SchemaError>> {
        let id = self.find(path)?;
        Ok(self.node(id)?.diagnostics.clone())
    }

    /// Active `oneOf` variant of the node, `None` without `oneOf`
    pub fn variant(&self, path: &str) -> NodeResult<Option<usize>> {
        let id = self.find(path)?;
        Ok(self.node(id)?.variant)
    }

    /// Computed properties of the node, evaluating dirty ones first
    pub fn computed(&mut self, path: &str) -> NodeResult<ComputedSnapshot> {
        let id = self.find(path)?;
        self.refresh_computed(id);
        let node = self.node(id)?;
        Ok(node.computed.snapshot(node.active))
    }

    /// How many times the node's computed properties have run
    pub fn computed_evaluations(&self, path: &str, kind: ComputedKind) -> NodeResult<u64> {
        let id = self.find(path)?;
        Ok(self
            .node(id)?
            .computed
            .get(kind)
            .map(|p| p.evaluations())
            .unwrap_or(0))
    }

    /// Read-only view of the node at `path`
    pub fn snapshot(&mut self, path: &str) -> NodeResult<NodeSnapshot> {
        let id = self.find(path)?;
        self.snapshot_by_id(id)
    }

    pub fn snapshot_by_id(&mut self, id: NodeId) -> NodeResult<NodeSnapshot> {
        if !self.arena.contains(id) {
            return Err(NodeError::Stale(id.to_string()));
        }
        self.refresh_computed(id);
        let node = self.node(id)?;
        Ok(NodeSnapshot {
            id,
            path: node.path.to_string(),
            kind: node.kind(),
            value: self.node_value(id),
            errors: self.errors_for(id),
            computed_properties: node.computed.snapshot(node.active),
            variant: node.variant,
        })
    }

    /// Listen for events published at exactly `path`
    pub fn subscribe<F>(&mut self, path: &str, listener: F) -> NodeResult<Subscription>
    where
        F: FnMut(&NodeEvent) + 'static,
    {
        let parsed = NodePath::parse(path)?;
        Ok(self.cascade.subscribe(parsed, listener))
    }

    pub fn has_pending_events(&self) -> bool {
        self.cascade.has_pending() || !self.dirty.is_empty()
    }

    /// End the current batch: evaluate dirty computed properties, apply
    /// computed defaults, then deliver queued events. Returns the number of
    /// listener invocations.
    pub fn flush(&mut self) -> usize {
        self.settle();
        let calls = self.cascade.deliver();
        debug!(calls, nodes = self.arena.len(), "Flushed event cascade");
        calls
    }

    fn node(&self, id: NodeId) -> NodeResult<&Node> {
        self.arena
            .get(id)
            .ok_or_else(|| NodeError::Stale(id.to_string()))
    }

    pub(crate) fn find_path(&self, path: &NodePath) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.segments() {
            current = self.arena.get(current)?.child(segment)?;
        }
        self.arena.contains(current).then_some(current)
    }

    /// Value of a node composed from its children
    pub(crate) fn node_value(&self, id: NodeId) -> Option<Value> {
        let node = self.arena.get(id)?;
        match &node.body {
            NodeBody::Leaf { value } => value.clone(),
            NodeBody::Object {
                children,
                extra,
                foreign,
            } => {
                if let Some(foreign) = foreign {
                    return Some(foreign.clone());
                }
                let mut map = Map::new();
                for (name, child) in children {
                    let Some(child_node) = self.arena.get(*child) else {
                        continue;
                    };
                    if child_node.kind() == NodeKind::Virtual {
                        continue;
                    }
                    if let Some(value) = self.node_value(*child) {
                        map.insert(name.clone(), value);
                    }
                }
                for (key, value) in extra {
                    map.entry(key.clone()).or_insert_with(|| value.clone());
                }
                if let Some(index) = node.variant {
                    if node.schema.variants().get(index).is_some_and(crate::schema::one_of::is_tagged) {
                        map.insert(crate::domain::VARIANT_KEY.to_string(), Value::from(index));
                    }
                }
                Some(Value::Object(map))
            }
            NodeBody::Array { items, foreign } => {
                if let Some(foreign) = foreign {
                    return Some(foreign.clone());
                }
                Some(Value::Array(
                    items
                        .iter()
                        .map(|item| self.node_value(*item).unwrap_or(Value::Null))
                        .collect(),
                ))
            }
            NodeBody::Virtual { fields } => {
                let parent = node.path.parent()?;
                Some(Value::Array(
                    fields
                        .iter()
                        .map(|field| {
                            self.value_at(&parent.push_property(field))
                                .unwrap_or(Value::Null)
                        })
                        .collect(),
                ))
            }
        }
    }

    pub(crate) fn value_at(&self, path: &NodePath) -> Option<Value> {
        self.find_path(path).and_then(|id| self.node_value(id))
    }

    /// Parent chain of a node, nearest first
    pub(crate) fn ancestor_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.arena.get(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.arena.get(parent).and_then(|n| n.parent);
        }
        out
    }

    pub(crate) fn pre_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.arena.get(next) else {
                continue;
            };
            out.push(next);
            for child in node.child_ids().into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Children before parents
    pub(crate) fn post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = self.pre_order(id);
        out.reverse();
        out
    }

    pub(crate) fn errors_for(&self, id: NodeId) -> Vec<ValidationIssue> {
        let Some(node) = self.arena.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<ValidationIssue> = Vec::new();
        for nid in self.pre_order(id) {
            if let Some(n) = self.arena.get(nid) {
                out.extend(n.errors.iter().cloned());
            }
        }
        for ancestor in self.ancestor_ids(id) {
            let Some(a) = self.arena.get(ancestor) else {
                continue;
            };
            for issue in &a.errors {
                let points_inside = NodePath::parse(&issue.instance_path)
                    .map(|p| node.path.contains(&p))
                    .unwrap_or(false);
                if points_inside && !out.contains(issue) {
                    out.push(issue.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;
