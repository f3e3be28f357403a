//! Node storage
//!
//! Nodes live in a slot vector. Freed slots go to a free list and are reused;
//! each slot carries a generation so a [`NodeId`] held across a destruction
//! is detected as stale instead of aliasing the new occupant.

use crate::domain::NodeId;

use super::Node;

// =============================================================================
// Slots
// =============================================================================

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
    /// Reserved by `allocate` but not yet filled
    reserved: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free_indices: Vec<u32>,
    live: usize,
}

impl Arena {
    /// Reserve a handle for a node that is about to be built
    pub(crate) fn allocate(&mut self) -> NodeId {
        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.reserved = true;
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: None,
            reserved: true,
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Store the node built for a reserved handle
    pub(crate) fn fill(&mut self, node: Node) {
        let id = node.id;
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.reserved {
                slot.reserved = false;
                slot.node = Some(node);
                self.live += 1;
            }
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Free the slot; the handle and every copy of it become stale
    pub(crate) fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take();
        if node.is_some() {
            self.live -= 1;
        }
        slot.reserved = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push(id.index);
        node
    }

    /// Number of live nodes
    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
