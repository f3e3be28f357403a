//! Validator compilation
//!
//! A node always ends up with a validator: when `jsonschema` rejects the local
//! schema, a fallback is installed that reports the compile error on every run.

use jsonschema::error::ValidationErrorKind;
use serde_json::{Map, Value};
use tracing::warn;

use super::COMPILE_FAILED_KEYWORD;
use crate::domain::ValidationIssue;

/// Compiled validator attached to a node
pub enum NodeValidator {
    Compiled(Box<jsonschema::Validator>),
    /// Compilation failed; validation reports `error` instead
    Fallback { error: String },
    /// Nodes without constraints of their own (virtual nodes, disabled validation)
    AcceptAll,
}

impl std::fmt::Debug for NodeValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compiled(_) => f.write_str("NodeValidator::Compiled"),
            Self::Fallback { error } => f.debug_struct("NodeValidator::Fallback").field("error", error).finish(),
            Self::AcceptAll => f.write_str("NodeValidator::AcceptAll"),
        }
    }
}

impl NodeValidator {
    /// Compile `schema`; never fails
    pub fn compile(schema: &Value) -> Self {
        match jsonschema::validator_for(schema) {
            Ok(validator) => Self::Compiled(Box::new(validator)),
            Err(err) => {
                let error = err.to_string();
                warn!(error = %error, "Schema failed to compile, installing fallback validator");
                Self::Fallback { error }
            }
        }
    }

    /// Validator that reports `error` on every run
    pub fn fallback(error: impl Into<String>) -> Self {
        Self::Fallback { error: error.into() }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Pass/fail without collecting errors; `None` for a fallback validator
    pub fn is_valid(&self, instance: &Value) -> Option<bool> {
        match self {
            Self::Compiled(validator) => Some(validator.is_valid(instance)),
            Self::AcceptAll => Some(true),
            Self::Fallback { .. } => None,
        }
    }

    /// Run the validator.
    ///
    /// Issues carry raw pointers: `instance_path` relative to `instance`,
    /// `schema_path` as `#`-prefixed pointer into the compiled schema.
    /// `schema` is the compiled schema, used to look up the violated limit.
    pub fn validate(&self, instance: &Value, schema: &Value) -> Vec<ValidationIssue> {
        match self {
            Self::AcceptAll => Vec::new(),
            Self::Fallback { error } => {
                let mut params = Map::new();
                params.insert("error".to_string(), Value::String(error.clone()));
                vec![ValidationIssue {
                    schema_path: "#".to_string(),
                    instance_path: String::new(),
                    keyword: COMPILE_FAILED_KEYWORD.to_string(),
                    message: format!("Schema could not be compiled: {}", error),
                    params,
                }]
            }
            Self::Compiled(validator) => validator
                .iter_errors(instance)
                .map(|err| {
                    let schema_pointer = err.schema_path.to_string();
                    let keyword = keyword_of(&schema_pointer);
                    let mut params = Map::new();
                    if let ValidationErrorKind::Required { property } = &err.kind {
                        let name = match property {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        params.insert("missingProperty".to_string(), Value::String(name));
                    } else if let Some(expected) = schema.pointer(&schema_pointer) {
                        params.insert("expected".to_string(), expected.clone());
                    }
                    ValidationIssue {
                        schema_path: format!("#{}", schema_pointer),
                        instance_path: err.instance_path.to_string(),
                        keyword,
                        message: err.to_string(),
                        params,
                    }
                })
                .collect(),
        }
    }
}

/// Last segment of a schema pointer that names a keyword
fn keyword_of(schema_pointer: &str) -> String {
    schema_pointer
        .rsplit('/')
        .find(|seg| !seg.is_empty() && !seg.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or("schema")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compiled_validator_reports_issues() {
        let schema = json!({ "type": "object", "required": ["name"], "properties": { "age": { "minimum": 18 } } });
        let validator = NodeValidator::compile(&schema);
        assert!(!validator.is_fallback());

        let issues = validator.validate(&json!({ "age": 3 }), &schema);
        assert_eq!(issues.len(), 2);
        let required = issues.iter().find(|i| i.keyword == "required").unwrap();
        assert_eq!(required.params["missingProperty"], "name");
        assert_eq!(required.instance_path, "");
        let minimum = issues.iter().find(|i| i.keyword == "minimum").unwrap();
        assert_eq!(minimum.instance_path, "/age");
        assert_eq!(minimum.schema_path, "#/properties/age/minimum");
        assert_eq!(minimum.params["expected"], 18);
    }

    #[test]
    fn test_malformed_schema_installs_fallback() {
        let schema = json!({ "type": 12 });
        let validator = NodeValidator::compile(&schema);
        assert!(validator.is_fallback());

        for value in [json!(null), json!("x"), json!({ "a": 1 })] {
            let issues = validator.validate(&value, &schema);
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].keyword, COMPILE_FAILED_KEYWORD);
            assert!(issues[0].params["error"].as_str().is_some());
        }
    }

    #[test]
    fn test_accept_all() {
        let issues = NodeValidator::AcceptAll.validate(&json!(42), &json!(false));
        assert!(issues.is_empty());
        assert_eq!(NodeValidator::AcceptAll.is_valid(&json!(42)), Some(true));
    }

    #[test]
    fn test_is_valid() {
        let validator = NodeValidator::compile(&json!({ "type": "string" }));
        assert_eq!(validator.is_valid(&json!("a")), Some(true));
        assert_eq!(validator.is_valid(&json!(1)), Some(false));
        assert_eq!(NodeValidator::fallback("broken").is_valid(&json!(1)), None);
    }

    #[test]
    fn test_keyword_of() {
        assert_eq!(keyword_of("/properties/a/minLength"), "minLength");
        assert_eq!(keyword_of("/anyOf/1"), "anyOf");
        assert_eq!(keyword_of(""), "schema");
    }
}
