//! Validation Pipeline
//!
//! Compiles a node's local schema once, runs it on every change and rewrites
//! the raised errors into [`ValidationIssue`]s with canonical paths.

use serde_json::Value;

pub mod compiler;
pub mod transform;

pub use compiler::NodeValidator;
pub use transform::{error_set_hash, localize_message, normalize_issues, render_message, ValidationScope};

use crate::domain::ValidationIssue;

/// Keyword of the single issue a fallback validator reports
pub const COMPILE_FAILED_KEYWORD: &str = "schemaCompileFailed";

/// Ordered issues from one validation run; replaced wholesale on the next
pub type ValidationResult = Vec<ValidationIssue>;

/// Run `validator` against `instance` and normalise the result for `scope`
pub fn validate(validator: &NodeValidator, schema: &Value, instance: &Value, scope: &ValidationScope<'_>) -> ValidationResult {
    let raw = validator.validate(instance, schema);
    normalize_issues(raw, instance, scope)
}
