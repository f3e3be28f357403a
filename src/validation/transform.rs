//! Error normalisation
//!
//! Raw validator output is rewritten into the engine's canonical shape:
//! instance paths become dot/bracket paths measured from the form root,
//! `required` errors point at the missing property, and `errorMessages`
//! overrides are applied.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::domain::{NodePath, ValidationIssue};

/// Where a node's raw issues come from and which messages apply to them
pub struct ValidationScope<'a> {
    /// Path of the validated node
    pub base: &'a NodePath,
    /// `errorMessages` of the node's own schema
    pub messages: Option<&'a Map<String, Value>>,
    /// `errorMessages` of each child property schema, consulted for `required`
    pub property_messages: HashMap<&'a str, &'a Map<String, Value>>,
    pub locale: Option<&'a str>,
}

impl<'a> ValidationScope<'a> {
    pub fn new(base: &'a NodePath) -> Self {
        Self {
            base,
            messages: None,
            property_messages: HashMap::new(),
            locale: None,
        }
    }
}

/// Rewrite raw issues produced for `instance` into canonical issues
pub fn normalize_issues(raw: Vec<ValidationIssue>, instance: &Value, scope: &ValidationScope<'_>) -> Vec<ValidationIssue> {
    raw.into_iter()
        .map(|issue| normalize_issue(issue, instance, scope))
        .collect()
}

fn normalize_issue(mut issue: ValidationIssue, instance: &Value, scope: &ValidationScope<'_>) -> ValidationIssue {
    let offending = instance.pointer(&issue.instance_path).cloned();
    let relative = NodePath::from_pointer(&issue.instance_path).unwrap_or_default();
    let mut path = scope.base.join(&relative);

    let mut messages = scope.messages;
    if issue.keyword == "required" {
        if let Some(missing) = issue.params.get("missingProperty").and_then(Value::as_str) {
            path = path.push_property(missing);
            if relative.is_root() {
                if let Some(child) = scope.property_messages.get(missing) {
                    if child.contains_key("required") {
                        messages = Some(child);
                    }
                }
            }
        }
    }
    issue.instance_path = path.to_string();

    if let Some(template) = messages.and_then(|m| localize_message(m, &issue.keyword, scope.locale)) {
        issue.message = render_message(&template, &issue.params, offending.as_ref());
    }
    issue
}

/// Pick the message for `keyword`: a plain string, or the entry for `locale`
/// in a locale map (falling back to its `default` entry)
pub fn localize_message(messages: &Map<String, Value>, keyword: &str, locale: Option<&str>) -> Option<String> {
    match messages.get(keyword)? {
        Value::String(text) => Some(text.clone()),
        Value::Object(by_locale) => locale
            .and_then(|l| by_locale.get(l))
            .or_else(|| by_locale.get("default"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

/// Substitute `{param}` placeholders from params and `{value}` from the offending value
pub fn render_message(template: &str, params: &Map<String, Value>, value: Option<&Value>) -> String {
    let mut rendered = template.to_string();
    for (name, param) in params {
        rendered = rendered.replace(&format!("{{{}}}", name), &display_value(param));
    }
    if let Some(value) = value {
        rendered = rendered.replace("{value}", &display_value(value));
    }
    rendered
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stable hash of an error set.
///
/// Issues are serialized, then sorted by schema path and by their
/// concatenated `key=value` params, so two runs that raise the same errors in a
/// different order hash identically.
pub fn error_set_hash(issues: &[ValidationIssue]) -> String {
    let mut lines: Vec<(String, String, String)> = issues
        .iter()
        .map(|issue| {
            let params: String = issue
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            (issue.schema_path.clone(), params, issue.instance_path.clone())
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for (schema_path, params, instance_path) in &lines {
        hasher.update(schema_path.as_bytes());
        hasher.update(b"|");
        hasher.update(params.as_bytes());
        hasher.update(b"|");
        hasher.update(instance_path.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}
