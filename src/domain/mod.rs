use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod error;
pub mod path;

pub use error::{FormError, FormResult, NodeError, NodeResult, SchemaError, SchemaResult};
pub use path::{NodePath, PathSegment};

/// Reserved property carrying the ordinal of the selected `oneOf` variant
pub const VARIANT_KEY: &str = "__variant__";

/// Structural kind of a node, derived from the resolved `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Object,
    Array,
    String,
    /// Both `number` and `integer`; they differ only in validation
    Number,
    Boolean,
    Null,
    /// Groups sibling fields without contributing data of its own
    Virtual,
    /// No `type` and nothing to infer one from
    Any,
}

impl NodeKind {
    pub fn is_leaf(&self) -> bool {
        !matches!(self, NodeKind::Object | NodeKind::Array | NodeKind::Virtual)
    }

    /// Value a freshly created node of this kind holds when nothing was supplied
    pub fn empty_value(&self) -> Option<Value> {
        match self {
            NodeKind::Object => Some(Value::Object(Map::new())),
            NodeKind::Array => Some(Value::Array(Vec::new())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::Array => "array",
            NodeKind::String => "string",
            NodeKind::Number => "number",
            NodeKind::Boolean => "boolean",
            NodeKind::Null => "null",
            NodeKind::Virtual => "virtual",
            NodeKind::Any => "any",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable handle of a node inside its form.
///
/// Slots are reused after a node is destroyed, the generation tells the old
/// occupant from the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A single validation failure in wire-stable shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub schema_path: String,
    pub instance_path: String,
    pub keyword: String,
    pub message: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Derived properties of a node as seen by the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedSnapshot {
    pub visible: bool,
    pub read_only: bool,
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Default for ComputedSnapshot {
    fn default() -> Self {
        Self {
            visible: true,
            read_only: false,
            disabled: false,
            watch_values: Vec::new(),
            default: None,
        }
    }
}

/// Read-only view of one node handed to the rendering layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub path: String,
    pub kind: NodeKind,
    pub value: Option<Value>,
    pub errors: Vec<ValidationIssue>,
    pub computed_properties: ComputedSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<usize>,
}

/// Supplies schemas for `$ref` pointers.
///
/// Lookups are synchronous and must not perform I/O; callers pre-load the table.
pub trait ReferenceResolver {
    fn resolve_reference(&self, pointer: &str) -> Option<Value>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn resolve_reference(&self, pointer: &str) -> Option<Value> {
        self(pointer)
    }
}
