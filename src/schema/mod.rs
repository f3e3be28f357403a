//! Schema Resolver
//!
//! Turns raw JSON Schema into [`NormalizedSchema`]: `allOf` merged, `$ref`
//! expanded from a [`ReferenceTable`] and `oneOf` variants tagged with a
//! discriminant.

use serde_json::{Map, Value};

use crate::domain::{NodeKind, SchemaError, SchemaResult, VARIANT_KEY};

pub mod merge;
pub mod one_of;
pub mod reference;
pub mod resolver;

pub use merge::{merge_all_of, merge_all_of_lenient};
pub use one_of::tag_one_of_variants;
pub use reference::{expand_references, ReferenceTable};
pub use resolver::{Resolution, SchemaResolver};

/// Keywords understood only by the engine; they never reach the validator
const ENGINE_KEYWORDS: &[&str] = &["computed", "errorMessages", "fields", "$defs", "definitions"];

/// A schema without `allOf` at its own level and with a known structural kind
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSchema {
    raw: Value,
    kind: NodeKind,
}

impl NormalizedSchema {
    pub fn new(raw: Value) -> SchemaResult<Self> {
        let kind = detect_kind(&raw)?;
        Ok(Self { raw, kind })
    }

    /// Schema of an inert node used where resolution failed or depth ran out
    pub fn inert() -> Self {
        Self {
            raw: Value::Object(Map::new()),
            kind: NodeKind::Any,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    fn keyword(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Declared properties in declaration order, without the discriminant
    pub fn properties(&self) -> Vec<(&str, &Value)> {
        self.keyword("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter(|(name, _)| name.as_str() != VARIANT_KEY)
                    .map(|(name, schema)| (name.as_str(), schema))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties().into_iter().map(|(name, _)| name).collect()
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.keyword("properties")?.get(name)
    }

    pub fn required(&self) -> Vec<&str> {
        self.keyword("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Item schema of an array; `true` when none is declared
    pub fn items(&self) -> Value {
        self.keyword("items").cloned().unwrap_or(Value::Bool(true))
    }

    /// Tagged `oneOf` variants, empty when the schema has none
    pub fn variants(&self) -> &[Value] {
        self.keyword("oneOf")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_variants(&self) -> bool {
        !self.variants().is_empty()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.keyword("default")
    }

    pub fn is_read_only(&self) -> bool {
        self.keyword("readOnly").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn computed(&self) -> Option<&Map<String, Value>> {
        self.keyword("computed").and_then(Value::as_object)
    }

    pub fn error_messages(&self) -> Option<&Map<String, Value>> {
        self.keyword("errorMessages").and_then(Value::as_object)
    }

    /// Sibling field names grouped by a `virtual` node
    pub fn virtual_fields(&self) -> Vec<String> {
        self.keyword("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `if` condition plus the property names each branch mentions
    pub fn conditional(&self) -> Option<Conditional> {
        let condition = self.keyword("if")?.clone();
        let then_fields = branch_fields(self.keyword("then"));
        let else_fields = branch_fields(self.keyword("else"));
        Some(Conditional {
            condition,
            then_fields,
            else_fields,
        })
    }

    /// Schema a node validates its own value against.
    ///
    /// Child property schemas become `true` (children validate themselves),
    /// array items are dropped, the active `oneOf` variant is merged in and
    /// engine-only keywords are removed.
    pub fn local_schema(&self, variant: Option<usize>) -> Value {
        let mut local = self.raw.clone();
        if let Some(index) = variant {
            if let Some(chosen) = self.variants().get(index) {
                if let Err(err) = merge::merge_into(&mut local, chosen) {
                    tracing::warn!(error = %err, variant = index, "Variant does not merge with its base");
                }
            }
        }
        let Some(obj) = local.as_object_mut() else {
            return local;
        };
        obj.remove("oneOf");
        obj.remove("items");
        obj.remove("prefixItems");
        for keyword in ENGINE_KEYWORDS {
            obj.remove(*keyword);
        }
        if let Some(Value::Object(props)) = obj.get_mut("properties") {
            // the discriminant keeps its const constraint
            for (name, schema) in props.iter_mut() {
                if name != VARIANT_KEY {
                    *schema = Value::Bool(true);
                }
            }
        }
        local
    }
}

/// The conditional extension of an object schema
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub condition: Value,
    pub then_fields: Vec<String>,
    pub else_fields: Vec<String>,
}

impl Conditional {
    /// Property names governed by the condition
    pub fn governed(&self) -> Vec<String> {
        let mut fields = self.then_fields.clone();
        for name in &self.else_fields {
            if !fields.contains(name) {
                fields.push(name.clone());
            }
        }
        fields
    }
}

fn branch_fields(branch: Option<&Value>) -> Vec<String> {
    let Some(branch) = branch else {
        return Vec::new();
    };
    let mut fields: Vec<String> = branch
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    if let Some(required) = branch.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
    }
    fields
}

/// Determine the structural kind a schema describes.
///
/// `integer` and `number` share [`NodeKind::Number`]. Without a `type`, the
/// kind is inferred from `properties`/`oneOf` (object) or `items` (array).
pub fn detect_kind(schema: &Value) -> SchemaResult<NodeKind> {
    let Some(obj) = schema.as_object() else {
        return match schema {
            Value::Bool(_) => Ok(NodeKind::Any),
            other => Err(SchemaError::UnknownType(other.to_string())),
        };
    };
    match obj.get("type") {
        Some(Value::String(name)) => kind_from_name(name),
        Some(Value::Array(names)) => {
            let mut named = names.iter().map(|n| {
                n.as_str()
                    .ok_or_else(|| SchemaError::UnknownType(n.to_string()))
            });
            let mut saw_null = false;
            for name in named.by_ref() {
                let name = name?;
                if name == "null" {
                    saw_null = true;
                    continue;
                }
                return kind_from_name(name);
            }
            if saw_null {
                Ok(NodeKind::Null)
            } else {
                Err(SchemaError::UnknownType("[]".to_string()))
            }
        }
        Some(other) => Err(SchemaError::UnknownType(other.to_string())),
        None => {
            if obj.contains_key("properties")
                || obj.contains_key("required")
                || obj.contains_key("additionalProperties")
                || obj.contains_key("oneOf")
            {
                Ok(NodeKind::Object)
            } else if obj.contains_key("items") {
                Ok(NodeKind::Array)
            } else {
                Ok(NodeKind::Any)
            }
        }
    }
}

fn kind_from_name(name: &str) -> SchemaResult<NodeKind> {
    match name {
        "object" => Ok(NodeKind::Object),
        "array" => Ok(NodeKind::Array),
        "string" => Ok(NodeKind::String),
        "number" | "integer" => Ok(NodeKind::Number),
        "boolean" => Ok(NodeKind::Boolean),
        "null" => Ok(NodeKind::Null),
        "virtual" => Ok(NodeKind::Virtual),
        other => Err(SchemaError::UnknownType(other.to_string())),
    }
}
