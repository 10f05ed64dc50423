//! Generational node arena backing [`OrderedList`](super::OrderedList).
//!
//! Nodes live in slots addressed by `u32` indices. Removing a node bumps the
//! slot generation and returns the slot to a free list, so a handle taken
//! before the removal can never alias a node inserted later.

use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique list identity.
pub(crate) fn next_list_id() -> u64 {
    NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Stable identity of one node in one list.
///
/// Equality is identity: two handles are equal only if they name the same
/// slot of the same list at the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) list: u64,
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl NodeHandle {
    /// Identity of the list that issued this handle.
    pub fn list_id(&self) -> u64 {
        self.list
    }
}

/// Payload plus links. Links are slot indices within the same arena.
#[derive(Debug)]
pub(crate) struct Node<T> {
    pub(crate) value: T,
    pub(crate) prev: Option<u32>,
    pub(crate) next: Option<u32>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Slot storage with a free list.
#[derive(Debug)]
pub(crate) struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> NodeArena<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Store a node, returning its slot and the slot's current generation.
    pub(crate) fn insert(&mut self, node: Node<T>) -> (u32, u32) {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.node = Some(node);
            return (slot, entry.generation);
        }
        let slot = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("node arena overflow: more than {} live nodes", u32::MAX)
        });
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        (slot, 0)
    }

    /// Vacate a slot. The generation is bumped so outstanding handles go stale.
    pub(crate) fn remove(&mut self, slot: u32) -> Option<Node<T>> {
        let entry = self.slots.get_mut(slot as usize)?;
        let node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
        Some(node)
    }

    /// True if `slot` holds a node at exactly `generation`.
    pub(crate) fn is_live(&self, slot: u32, generation: u32) -> bool {
        self.slots
            .get(slot as usize)
            .map_or(false, |s| s.generation == generation && s.node.is_some())
    }

    pub(crate) fn generation(&self, slot: u32) -> u32 {
        self.slots[slot as usize].generation
    }

    /// Vacate every slot, keeping capacity and invalidating all handles.
    pub(crate) fn clear(&mut self) {
        self.free.clear();
        for (idx, entry) in self.slots.iter_mut().enumerate().rev() {
            if entry.node.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
            }
            self.free.push(idx as u32);
        }
    }
}

impl<T> Index<u32> for NodeArena<T> {
    type Output = Node<T>;

    fn index(&self, slot: u32) -> &Node<T> {
        match self.slots.get(slot as usize).and_then(|s| s.node.as_ref()) {
            Some(node) => node,
            None => panic!("linked slot {slot} is vacant: list links are corrupt"),
        }
    }
}

impl<T> IndexMut<u32> for NodeArena<T> {
    fn index_mut(&mut self, slot: u32) -> &mut Node<T> {
        match self.slots.get_mut(slot as usize).and_then(|s| s.node.as_mut()) {
            Some(node) => node,
            None => panic!("linked slot {slot} is vacant: list links are corrupt"),
        }
    }
}
