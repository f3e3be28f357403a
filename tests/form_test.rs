use schema_form::{EventKind, Form, NodeEvent, NodeKind};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn order_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "customer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 2 },
                    "email": { "type": "string", "pattern": "^[^@]+@[^@]+$" }
                },
                "required": ["name"]
            },
            "lines": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "sku": {
                            "type": "string",
                            "computed": {
                                "readOnly": { "expression": "deps[0] == true", "dependencies": ["/express"] }
                            }
                        },
                        "qty": { "type": "integer", "minimum": 1 }
                    }
                }
            },
            "express": { "type": "boolean" },
            "courier": {
                "type": "string",
                "computed": {
                    "visible": { "expression": "deps[0] == true", "dependencies": ["/express"] }
                }
            }
        }
    })
}

fn recorder() -> (Rc<RefCell<Vec<NodeEvent>>>, impl FnMut(&NodeEvent) + 'static) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    (events, move |event: &NodeEvent| sink.borrow_mut().push(event.clone()))
}

#[test]
fn test_batched_edits_deliver_one_event_per_path() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let (events, listener) = recorder();
    let _subscription = form.subscribe("customer.name", listener).unwrap();

    for name in ["A", "Al", "Ali", "Alic", "Alice"] {
        form.set_value("customer.name", json!(name)).unwrap();
    }
    assert!(events.borrow().is_empty());

    form.flush();

    let events = events.borrow();
    let changes: Vec<&NodeEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::ValueChanged)
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].payload, json!("Alice"));
}

#[test]
fn test_validity_change_reaches_ancestors() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let (events, listener) = recorder();
    let _subscription = form.subscribe("customer", listener).unwrap();

    form.set_value("customer.email", json!("not-an-address")).unwrap();
    form.flush();

    let events = events.borrow();
    let validity = events
        .iter()
        .find(|e| e.kind == EventKind::ValidityChanged)
        .expect("customer validity event");
    assert_eq!(validity.payload["valid"], json!(false));
    let keywords: Vec<&str> = validity.payload["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["keyword"].as_str())
        .collect();
    assert!(keywords.contains(&"pattern"));
    assert!(keywords.contains(&"required"));
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let (events, listener) = recorder();
    let subscription = form.subscribe("express", listener).unwrap();

    form.set_value("express", json!(true)).unwrap();
    form.flush();
    assert_eq!(events.borrow().len(), 1);

    subscription.unsubscribe();
    subscription.unsubscribe();
    form.set_value("express", json!(false)).unwrap();
    form.flush();
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn test_destroyed_nodes_drop_listeners_and_events() {
    let mut form = Form::new(order_schema(), Some(json!({ "lines": [{ "sku": "a", "qty": 1 }, { "sku": "b", "qty": 2 }] })))
        .unwrap();
    let (item_events, item_listener) = recorder();
    let item_subscription = form.subscribe("lines[1].qty", item_listener).unwrap();
    let (sku_events, sku_listener) = recorder();
    let _sku = form.subscribe("lines[1].sku", sku_listener).unwrap();
    let (list_events, list_listener) = recorder();
    let _list = form.subscribe("lines", list_listener).unwrap();

    // leaves a dirty computed property inside the doomed item
    form.set_value("express", json!(true)).unwrap();
    form.set_value("lines[1].qty", json!(5)).unwrap();
    form.remove_item("lines", 1).unwrap();
    form.flush();

    assert!(item_events.borrow().is_empty());
    assert!(sku_events.borrow().is_empty());
    assert!(!item_subscription.is_active());
    assert!(form.computed("lines[0].sku").unwrap().read_only);
    let kinds: Vec<EventKind> = list_events.borrow().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::ChildRemoved));
    assert!(kinds.contains(&EventKind::ValueChanged));
    assert!(form.find("lines[1]").is_err());
}

#[test]
fn test_child_added_bubbles_to_root() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let (events, listener) = recorder();
    let _root = form.subscribe("", listener).unwrap();

    form.push_item("lines", json!({ "sku": "x", "qty": 0 })).unwrap();
    form.flush();

    let events = events.borrow();
    let added = events
        .iter()
        .find(|e| e.kind == EventKind::ChildAdded)
        .expect("child added at root");
    assert_eq!(added.payload["path"], json!("lines[0]"));
    assert_eq!(form.errors("lines[0].qty").unwrap()[0].keyword, "minimum");
}

#[test]
fn test_computed_change_is_published_on_flush() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let (events, listener) = recorder();
    let _subscription = form.subscribe("courier", listener).unwrap();
    assert!(!form.computed("courier").unwrap().visible);

    form.set_value("express", json!(true)).unwrap();
    assert!(form.has_pending_events());
    form.flush();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::ComputedChanged);
    assert_eq!(events[0].payload["visible"], json!(true));
    assert!(!form.has_pending_events());
}

#[test]
fn test_flush_delivers_each_event_once() {
    let mut form = Form::new(order_schema(), None).unwrap();
    let count = Rc::new(RefCell::new(0));
    let seen = count.clone();
    let _subscription = form
        .subscribe("express", move |_| *seen.borrow_mut() += 1)
        .unwrap();

    form.set_value("express", json!(true)).unwrap();
    assert_eq!(form.flush(), 1);
    assert_eq!(form.flush(), 0);
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn test_malformed_subschema_gets_fallback_validator() {
    let schema = json!({
        "type": "object",
        "properties": {
            "code": { "type": "string", "pattern": "(" },
            "note": { "type": "string" }
        }
    });
    let mut form = Form::new(schema, None).unwrap();

    for value in [json!("abc"), json!(""), json!(42)] {
        form.set_value("code", value).unwrap();
        let errors = form.errors("code").unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].keyword, "schemaCompileFailed");
    }
    form.set_value("note", json!("fine")).unwrap();
    assert!(form.errors("note").unwrap().is_empty());
}

#[test]
fn test_snapshot_reflects_node_state() {
    let mut form = Form::new(order_schema(), Some(json!({ "customer": { "name": "Bo" } }))).unwrap();

    let snapshot = form.snapshot("customer.name").unwrap();
    assert_eq!(snapshot.path, "customer.name");
    assert_eq!(snapshot.kind, NodeKind::String);
    assert_eq!(snapshot.value, Some(json!("Bo")));
    assert!(snapshot.errors.is_empty());
    assert!(snapshot.computed_properties.visible);

    let wire = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(wire["computedProperties"]["readOnly"], json!(false));
}

#[test]
fn test_custom_messages_are_localized() {
    let schema = json!({
        "type": "object",
        "properties": {
            "age": {
                "type": "integer",
                "minimum": 18,
                "errorMessages": {
                    "minimum": { "default": "Must be at least {expected}", "de": "Mindestens {expected}, nicht {value}" }
                }
            }
        }
    });
    let mut settings = schema_form::EngineSettings::default();
    settings.validation.locale = Some("de".to_string());
    let mut form = Form::with_resolver(schema, None, schema_form::ReferenceTable::default(), settings).unwrap();

    form.set_value("age", json!(12)).unwrap();

    let errors = form.errors("age").unwrap();
    assert_eq!(errors[0].message, "Mindestens 18, nicht 12");
}
