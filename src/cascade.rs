//! Event Cascade
//!
//! Path-addressed publish/subscribe with batched delivery. `publish` only
//! queues; the queue is drained by [`EventCascade::deliver`], which the form
//! calls from its `flush`. Publishing the same `(path, kind)` twice before a
//! drain keeps the first queue position and the latest payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::domain::NodePath;

/// What happened at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ValueChanged,
    ValidityChanged,
    ChildAdded,
    ChildRemoved,
    VariantChanged,
    ComputedChanged,
}

impl EventKind {
    /// Structural events change the shape of the tree
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EventKind::ChildAdded | EventKind::ChildRemoved | EventKind::VariantChanged
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::ValueChanged => "valueChanged",
            EventKind::ValidityChanged => "validityChanged",
            EventKind::ChildAdded => "childAdded",
            EventKind::ChildRemoved => "childRemoved",
            EventKind::VariantChanged => "variantChanged",
            EventKind::ComputedChanged => "computedChanged",
        };
        f.write_str(name)
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub path: NodePath,
    pub kind: EventKind,
    pub payload: Value,
}

pub type SubscriptionId = u64;

type Listener = Rc<RefCell<Box<dyn FnMut(&NodeEvent)>>>;

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    listeners: BTreeMap<NodePath, Vec<(SubscriptionId, Listener)>>,
}

impl Registry {
    fn contains(&self, path: &NodePath, id: SubscriptionId) -> bool {
        self.listeners
            .get(path)
            .map(|ls| ls.iter().any(|(lid, _)| *lid == id))
            .unwrap_or(false)
    }

    fn remove(&mut self, path: &NodePath, id: SubscriptionId) -> bool {
        let Some(listeners) = self.listeners.get_mut(path) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.listeners.remove(path);
        }
        removed
    }
}

/// Handle returned by [`EventCascade::subscribe`]
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    path: NodePath,
    registry: Weak<RefCell<Registry>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path.to_string())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// Remove the listener. Idempotent, and safe to call from inside a listener.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(&self.path, self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|r| r.borrow().contains(&self.path, self.id))
            .unwrap_or(false)
    }
}

/// The batched notification bus
#[derive(Default)]
pub struct EventCascade {
    registry: Rc<RefCell<Registry>>,
    pending: Vec<NodeEvent>,
    positions: HashMap<(NodePath, EventKind), usize>,
}

impl fmt::Debug for EventCascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCascade")
            .field("pending", &self.pending.len())
            .field("paths", &self.registry.borrow().listeners.len())
            .finish()
    }
}

impl EventCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events published at exactly `path`
    pub fn subscribe<F>(&mut self, path: NodePath, listener: F) -> Subscription
    where
        F: FnMut(&NodeEvent) + 'static,
    {
        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        let listener: Listener = Rc::new(RefCell::new(Box::new(listener)));
        registry
            .listeners
            .entry(path.clone())
            .or_default()
            .push((id, listener));
        Subscription {
            id,
            path,
            registry: Rc::downgrade(&self.registry),
        }
    }

    /// Queue an event; same-batch duplicates coalesce onto the latest payload
    pub fn publish(&mut self, path: NodePath, kind: EventKind, payload: Value) {
        let key = (path, kind);
        if let Some(&position) = self.positions.get(&key) {
            self.pending[position].payload = payload;
            return;
        }
        let (path, kind) = key.clone();
        self.positions.insert(key, self.pending.len());
        self.pending.push(NodeEvent { path, kind, payload });
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[NodeEvent] {
        &self.pending
    }

    pub fn listener_count(&self, path: &NodePath) -> usize {
        self.registry
            .borrow()
            .listeners
            .get(path)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Drop queued events and listeners at `prefix` or below it
    pub fn cancel(&mut self, prefix: &NodePath) {
        self.pending.retain(|event| !prefix.contains(&event.path));
        self.reindex();
        self.registry
            .borrow_mut()
            .listeners
            .retain(|path, _| !prefix.contains(path));
    }

    /// Deliver every queued event in publish order. Returns the number of
    /// listener invocations.
    pub fn deliver(&mut self) -> usize {
        let batch = std::mem::take(&mut self.pending);
        self.positions.clear();
        let mut calls = 0;
        for event in &batch {
            let listeners: Vec<(SubscriptionId, Listener)> = self
                .registry
                .borrow()
                .listeners
                .get(&event.path)
                .cloned()
                .unwrap_or_default();
            for (id, listener) in listeners {
                // a listener earlier in this pass may have removed this one
                if !self.registry.borrow().contains(&event.path, id) {
                    continue;
                }
                if let Ok(mut callback) = listener.try_borrow_mut() {
                    callback(event);
                    calls += 1;
                }
            }
        }
        calls
    }

    fn reindex(&mut self) {
        self.positions = self
            .pending
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.path.clone(), e.kind), i))
            .collect();
    }
}
