use super::*;
use serde_json::json;

fn build(schema: Value, path: &str) -> (ComputedSet, Vec<SchemaError>) {
    let schema = NormalizedSchema::new(schema).unwrap();
    let path = NodePath::parse(path).unwrap();
    ComputedSet::from_schema(&schema, &path, &ExpressionEngine::default())
}

#[test]
fn test_dependencies_resolve_relative_to_node() {
    let (set, diagnostics) = build(
        json!({
            "type": "string",
            "computed": {
                "visible": {
                    "expression": "deps[0] == \"business\"",
                    "dependencies": ["../accountType", "/settings/mode", "./inner"]
                }
            }
        }),
        "profile.company",
    );
    assert!(diagnostics.is_empty());
    let visible = set.get(ComputedKind::Visible).unwrap();
    let deps: Vec<String> = visible.dependencies().iter().map(|d| d.to_string()).collect();
    assert_eq!(deps, vec!["profile.accountType", "settings.mode", "profile.company.inner"]);
}

#[test]
fn test_flag_results_are_coerced() {
    let engine = ExpressionEngine::default();
    let (mut set, _) = build(
        json!({ "computed": { "disabled": { "expression": "deps[0]", "dependencies": ["/count"] } } }),
        "field",
    );
    let disabled = set.get_mut(ComputedKind::Disabled).unwrap();
    assert!(disabled.evaluate(&engine, &[json!(3)], None));
    assert_eq!(disabled.cached(), &json!(true));

    set.invalidate(&NodePath::parse("count").unwrap());
    let disabled = set.get_mut(ComputedKind::Disabled).unwrap();
    disabled.evaluate(&engine, &[json!(null)], None);
    assert_eq!(disabled.cached(), &json!(false));
}

#[test]
fn test_evaluates_once_per_invalidation() {
    let engine = ExpressionEngine::default();
    let (mut set, _) = build(
        json!({ "computed": { "visible": { "expression": "deps[0] && deps[1]", "dependencies": ["/a", "/b"] } } }),
        "x",
    );
    set.get_mut(ComputedKind::Visible).unwrap().evaluate(&engine, &[json!(true), json!(true)], None);

    set.invalidate(&NodePath::parse("a").unwrap());
    set.invalidate(&NodePath::parse("b").unwrap());
    set.invalidate(&NodePath::parse("a").unwrap());
    let visible = set.get_mut(ComputedKind::Visible).unwrap();
    visible.evaluate(&engine, &[json!(true), json!(false)], None);
    visible.evaluate(&engine, &[json!(true), json!(false)], None);
    assert_eq!(visible.evaluations(), 2);
    assert_eq!(visible.cached(), &json!(false));
}

#[test]
fn test_unrelated_change_keeps_cache() {
    let (mut set, _) = build(
        json!({ "computed": { "visible": { "expression": "deps[0]", "dependencies": ["/a/b"] } } }),
        "x",
    );
    let engine = ExpressionEngine::default();
    set.get_mut(ComputedKind::Visible).unwrap().evaluate(&engine, &[json!(true)], None);

    assert!(!set.invalidate(&NodePath::parse("c").unwrap()));
    assert!(set.invalidate(&NodePath::parse("a").unwrap()));
}

#[test]
fn test_broken_expression_falls_back() {
    let (set, diagnostics) = build(
        json!({ "computed": { "visible": { "expression": "deps[0] ==", "dependencies": [] } } }),
        "x",
    );
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].code(), "EXPRESSION_COMPILE_FAILED");
    assert!(set.snapshot(true).visible);
}

#[test]
fn test_static_read_only_and_watch() {
    let engine = ExpressionEngine::default();
    let (mut set, _) = build(
        json!({ "readOnly": true, "computed": { "watch": ["/a", "../b"] } }),
        "group.field",
    );
    assert!(set.get(ComputedKind::ReadOnly).unwrap().is_constant());

    let watch = set.get_mut(ComputedKind::Watch).unwrap();
    assert_eq!(watch.dependencies()[1].to_string(), "group.b");
    watch.evaluate(&engine, &[json!(1), json!("two")], None);
    set.get_mut(ComputedKind::ReadOnly).unwrap().evaluate(&engine, &[], None);

    let snapshot = set.snapshot(true);
    assert!(snapshot.read_only);
    assert_eq!(snapshot.watch_values, vec![json!(1), json!("two")]);
}

#[test]
fn test_inactive_node_is_hidden() {
    let (set, _) = build(json!({ "type": "string" }), "x");
    assert!(set.is_empty());
    assert!(!set.snapshot(false).visible);
}

#[test]
fn test_own_value_change_marks_only_value_readers() {
    let engine = ExpressionEngine::default();
    let (mut set, _) = build(
        json!({
            "computed": {
                "visible": { "expression": "deps[0] == true", "dependencies": ["/flag"] },
                "disabled": "value == \"locked\""
            }
        }),
        "x",
    );
    set.get_mut(ComputedKind::Visible).unwrap().evaluate(&engine, &[json!(true)], None);
    set.get_mut(ComputedKind::Disabled).unwrap().evaluate(&engine, &[], None);

    assert!(set.invalidate_own());
    assert_eq!(set.dirty_kinds(), vec![ComputedKind::Disabled]);
}
