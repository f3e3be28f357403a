//! Sandboxed expression evaluation
//!
//! Computed properties are written as Rhai expressions. Only expressions are
//! accepted (no statements or function definitions) and the engine runs under
//! operation, depth and size limits, so a schema cannot hang or exhaust the
//! host. Dependency values are exposed as the `deps` array and the node's own
//! value as `value`.

use rhai::{Dynamic, Engine as RhaiEngine, Scope, AST};
use serde_json::{json, Map, Value};

use crate::config::ExpressionSettings;

/// An expression parsed once and evaluated many times
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    ast: AST,
    reads_value: bool,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression mentions the node's own `value`
    pub fn reads_value(&self) -> bool {
        self.reads_value
    }
}

/// Rhai engine configured for computed properties
pub struct ExpressionEngine {
    rhai_engine: RhaiEngine,
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine").finish_non_exhaustive()
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(&ExpressionSettings::default())
    }
}

impl ExpressionEngine {
    pub fn new(settings: &ExpressionSettings) -> Self {
        let mut rhai_engine = RhaiEngine::new();
        rhai_engine.set_max_expr_depths(settings.max_expr_depth, settings.max_expr_depth);
        rhai_engine.set_max_operations(settings.max_operations);
        rhai_engine.set_max_string_size(settings.max_string_size);
        rhai_engine.set_max_call_levels(16);
        rhai_engine.disable_symbol("eval");
        Self { rhai_engine }
    }

    /// Parse `source` as a single expression
    pub fn compile(&self, source: &str) -> Result<CompiledExpression, String> {
        let ast = self
            .rhai_engine
            .compile_expression(source)
            .map_err(|e| e.to_string())?;
        Ok(CompiledExpression {
            source: source.to_string(),
            ast,
            reads_value: mentions_identifier(source, "value"),
        })
    }

    /// Evaluate with `deps` bound to the ordered dependency values and `value`
    /// to the node's own value (`()` when it has none)
    pub fn evaluate(&self, expression: &CompiledExpression, deps: &[Value], value: Option<&Value>) -> Result<Value, String> {
        let mut scope = Scope::new();
        scope.push(
            "deps",
            Dynamic::from_array(deps.iter().map(json_to_dynamic).collect()),
        );
        scope.push("value", value.map(json_to_dynamic).unwrap_or(Dynamic::UNIT));
        let result: Dynamic = self
            .rhai_engine
            .eval_ast_with_scope(&mut scope, &expression.ast)
            .map_err(|e| format!("evaluation of '{}' failed: {}", expression.source, e))?;
        Ok(dynamic_to_json(&result))
    }
}

/// Scan for `name` as a bare identifier, skipping string literals and comments.
/// Property accesses such as `deps[0].value` also count, which only costs an
/// extra evaluation.
fn mentions_identifier(source: &str, name: &str) -> bool {
    let bytes = source.as_bytes();
    let is_ident = |b: u8| b == b'_' || b.is_ascii_alphanumeric();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b if is_ident(b) => {
                let start = i;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                if &source[start..i] == name {
                    return true;
                }
            }
            _ => i += 1,
        }
    }
    false
}

/// Boolean coercion for computed flags: `null`, `false`, `0`, `NaN` and the
/// empty string are false, everything else is true
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Convert JSON Value to Rhai Dynamic
fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => Dynamic::from_array(arr.iter().map(json_to_dynamic).collect()),
        Value::Object(obj) => {
            let map: rhai::Map = obj
                .iter()
                .map(|(k, v)| (k.clone().into(), json_to_dynamic(v)))
                .collect();
            Dynamic::from_map(map)
        }
    }
}

/// Convert Rhai Dynamic to JSON Value
fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        json!(i)
    } else if let Ok(f) = value.as_float() {
        json!(f)
    } else if value.is_string() {
        Value::String(value.to_string())
    } else if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let obj: Map<String, Value> = map
            .iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
            .collect();
        Value::Object(obj)
    } else {
        Value::String(value.to_string())
    }
}
