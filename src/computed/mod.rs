//! Computed Properties Manager
//!
//! A node's `computed` keyword declares derived attributes. Each one lists its
//! dependency paths explicitly; the list is authoritative and never inferred
//! from the expression text. A property is marked dirty when one of its
//! dependencies changes and re-evaluated at most once before it is read again.

use serde_json::Value;
use tracing::warn;

pub mod expression;

pub use expression::{truthy, CompiledExpression, ExpressionEngine};

use crate::domain::{ComputedSnapshot, NodePath, SchemaError};
use crate::schema::NormalizedSchema;

/// Attributes a schema may compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputedKind {
    Visible,
    ReadOnly,
    Disabled,
    Default,
    Watch,
}

impl ComputedKind {
    pub const ALL: [ComputedKind; 5] = [
        ComputedKind::Visible,
        ComputedKind::ReadOnly,
        ComputedKind::Disabled,
        ComputedKind::Default,
        ComputedKind::Watch,
    ];

    /// Key under `computed`
    pub fn key(&self) -> &'static str {
        match self {
            ComputedKind::Visible => "visible",
            ComputedKind::ReadOnly => "readOnly",
            ComputedKind::Disabled => "disabled",
            ComputedKind::Default => "default",
            ComputedKind::Watch => "watch",
        }
    }

    pub fn is_flag(&self) -> bool {
        matches!(
            self,
            ComputedKind::Visible | ComputedKind::ReadOnly | ComputedKind::Disabled
        )
    }

    /// Value used when nothing is declared or the expression is broken
    fn fallback(&self) -> Value {
        match self {
            ComputedKind::Visible => Value::Bool(true),
            ComputedKind::ReadOnly | ComputedKind::Disabled => Value::Bool(false),
            ComputedKind::Default => Value::Null,
            ComputedKind::Watch => Value::Array(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
enum Formula {
    Literal(Value),
    Expression(CompiledExpression),
    /// Exposes the dependency values as they are
    Watch,
}

/// One derived attribute of a node
#[derive(Debug, Clone)]
pub struct ComputedProperty {
    kind: ComputedKind,
    formula: Formula,
    dependencies: Vec<NodePath>,
    cached: Value,
    dirty: bool,
    evaluations: u64,
}

impl ComputedProperty {
    pub fn kind(&self) -> ComputedKind {
        self.kind
    }

    pub fn dependencies(&self) -> &[NodePath] {
        &self.dependencies
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Last evaluated value
    pub fn cached(&self) -> &Value {
        &self.cached
    }

    /// Number of times the formula actually ran
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.formula, Formula::Literal(_))
    }

    /// Recompute from the given dependency values when dirty.
    /// Returns true when the cached value changed.
    pub fn evaluate(&mut self, engine: &ExpressionEngine, deps: &[Value], own: Option<&Value>) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.evaluations += 1;
        let next = match &self.formula {
            Formula::Literal(value) => value.clone(),
            Formula::Watch => Value::Array(deps.to_vec()),
            Formula::Expression(expr) => match engine.evaluate(expr, deps, own) {
                Ok(value) => value,
                Err(err) => {
                    warn!(property = self.kind.key(), error = %err, "Computed expression failed");
                    self.kind.fallback()
                }
            },
        };
        let next = if self.kind.is_flag() {
            Value::Bool(truthy(&next))
        } else {
            next
        };
        let changed = next != self.cached;
        self.cached = next;
        changed
    }
}

/// All computed properties of a node
#[derive(Debug, Clone, Default)]
pub struct ComputedSet {
    properties: Vec<ComputedProperty>,
}

impl ComputedSet {
    /// Compile the `computed` keyword of `schema` for the node at `path`.
    ///
    /// Broken declarations fall back to the static value of their kind and are
    /// returned as diagnostics. A static `readOnly: true` seeds `readOnly`.
    pub fn from_schema(schema: &NormalizedSchema, path: &NodePath, engine: &ExpressionEngine) -> (Self, Vec<SchemaError>) {
        let mut properties = Vec::new();
        let mut diagnostics = Vec::new();
        let declared = schema.computed();

        for kind in ComputedKind::ALL {
            let declaration = declared.and_then(|c| c.get(kind.key()));
            let declaration = match (declaration, kind) {
                (Some(d), _) => d.clone(),
                (None, ComputedKind::ReadOnly) if schema.is_read_only() => Value::Bool(true),
                (None, _) => continue,
            };
            match compile_property(kind, &declaration, path, engine) {
                Ok(property) => properties.push(property),
                Err(err) => {
                    warn!(path = %path, property = kind.key(), error = %err, "Invalid computed property");
                    diagnostics.push(err);
                    if kind != ComputedKind::Default {
                        properties.push(ComputedProperty {
                            kind,
                            formula: Formula::Literal(kind.fallback()),
                            dependencies: Vec::new(),
                            cached: kind.fallback(),
                            dirty: true,
                            evaluations: 0,
                        });
                    }
                }
            }
        }
        (Self { properties }, diagnostics)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn get(&self, kind: ComputedKind) -> Option<&ComputedProperty> {
        self.properties.iter().find(|p| p.kind == kind)
    }

    pub fn get_mut(&mut self, kind: ComputedKind) -> Option<&mut ComputedProperty> {
        self.properties.iter_mut().find(|p| p.kind == kind)
    }

    pub fn properties(&self) -> &[ComputedProperty] {
        &self.properties
    }

    /// Mark dirty every property with a dependency at, above or below `changed`.
    /// Returns true when anything was marked.
    pub fn invalidate(&mut self, changed: &NodePath) -> bool {
        let mut marked = false;
        for property in &mut self.properties {
            if property.dependencies.iter().any(|dep| dep.overlaps(changed)) {
                property.dirty = true;
                marked = true;
            }
        }
        marked
    }

    /// Mark dirty the expressions that read the node's own `value`.
    /// Returns true when anything was marked.
    pub fn invalidate_own(&mut self) -> bool {
        let mut marked = false;
        for property in &mut self.properties {
            if matches!(&property.formula, Formula::Expression(expr) if expr.reads_value()) {
                property.dirty = true;
                marked = true;
            }
        }
        marked
    }

    pub fn has_dirty(&self) -> bool {
        self.properties.iter().any(|p| p.dirty)
    }

    /// Kinds of the properties waiting for re-evaluation
    pub fn dirty_kinds(&self) -> Vec<ComputedKind> {
        self.properties
            .iter()
            .filter(|p| p.dirty)
            .map(|p| p.kind)
            .collect()
    }

    /// Every dependency path declared by any property
    pub fn all_dependencies(&self) -> impl Iterator<Item = &NodePath> {
        self.properties.iter().flat_map(|p| p.dependencies.iter())
    }

    /// Cached values as the renderer sees them; `active` is false for
    /// conditional children whose branch is not selected
    pub fn snapshot(&self, active: bool) -> ComputedSnapshot {
        let mut snapshot = ComputedSnapshot::default();
        for property in &self.properties {
            match property.kind {
                ComputedKind::Visible => snapshot.visible = truthy(&property.cached),
                ComputedKind::ReadOnly => snapshot.read_only = truthy(&property.cached),
                ComputedKind::Disabled => snapshot.disabled = truthy(&property.cached),
                ComputedKind::Default => {
                    if !property.cached.is_null() {
                        snapshot.default = Some(property.cached.clone());
                    }
                }
                ComputedKind::Watch => {
                    if let Value::Array(values) = &property.cached {
                        snapshot.watch_values = values.clone();
                    }
                }
            }
        }
        if !active {
            snapshot.visible = false;
        }
        snapshot
    }
}

fn compile_property(kind: ComputedKind, declaration: &Value, path: &NodePath, engine: &ExpressionEngine) -> Result<ComputedProperty, SchemaError> {
    let invalid = |message: String| SchemaError::Expression {
        property: format!("{}#{}", path, kind.key()),
        message,
    };

    let (formula, raw_deps): (Formula, Vec<String>) = match (kind, declaration) {
        (ComputedKind::Watch, Value::Array(deps)) => (Formula::Watch, string_list(deps).map_err(invalid)?),
        (ComputedKind::Watch, Value::Object(obj)) => {
            let deps = obj
                .get("dependencies")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("watch needs a dependencies list".to_string()))?;
            (Formula::Watch, string_list(deps).map_err(invalid)?)
        }
        (ComputedKind::Watch, other) => {
            return Err(invalid(format!("watch must be a list of paths, got {}", other)))
        }
        (_, Value::String(source)) => (Formula::Expression(engine.compile(source).map_err(invalid)?), Vec::new()),
        (_, Value::Object(obj)) if obj.contains_key("expression") => {
            let source = obj
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("expression must be a string".to_string()))?;
            let deps = match obj.get("dependencies") {
                Some(Value::Array(deps)) => string_list(deps).map_err(invalid)?,
                Some(other) => return Err(invalid(format!("dependencies must be a list, got {}", other))),
                None => Vec::new(),
            };
            (Formula::Expression(engine.compile(source).map_err(invalid)?), deps)
        }
        (_, literal) => (Formula::Literal(literal.clone()), Vec::new()),
    };

    let dependencies = raw_deps
        .iter()
        .map(|dep| path.resolve(dep).map_err(|e| invalid(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ComputedProperty {
        kind,
        formula,
        dependencies,
        cached: kind.fallback(),
        dirty: true,
        evaluations: 0,
    })
}

fn string_list(values: &[Value]) -> Result<Vec<String>, String> {
    values
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| format!("dependency {} is not a path string", v))
        })
        .collect()
}

#[cfg(test)]
#[path = "computed_test.rs"]
mod tests;
