//! Doubly-linked ordered list with identity-based removal.
//!
//! Every insertion returns a [`NodeHandle`]. Handles are the only way to name
//! a member: two payloads that compare equal are still different members, and
//! a handle that outlives its node is simply absent, never a different node.

use std::fmt;
use std::iter::FusedIterator;

use thiserror::Error;

use super::arena::{next_list_id, Node, NodeArena, NodeHandle};

/// Contract failures reported by [`OrderedList`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    /// The handle was issued by another live list. Unlinking it here would
    /// desynchronize both lists' head/tail/len bookkeeping.
    #[error("node {handle:?} belongs to list {owner}, not to list {list}")]
    ForeignHandle {
        handle: NodeHandle,
        owner: u64,
        list: u64,
    },

    #[error("enumeration exhausted: no more elements")]
    Exhausted,
}

/// Ordered sequence with O(1) insertion and removal at both ends and at any
/// member named by handle.
pub struct OrderedList<T> {
    id: u64,
    arena: NodeArena<T>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> OrderedList<T> {
    pub fn new() -> Self {
        Self {
            id: next_list_id(),
            arena: NodeArena::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: next_list_id(),
            arena: NodeArena::with_capacity(capacity),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Process-unique identity of this list.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert at the tail.
    pub fn push(&mut self, value: T) -> NodeHandle {
        let (slot, generation) = self.arena.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => self.arena[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
        self.handle(slot, generation)
    }

    /// Insert at the head.
    pub fn unshift(&mut self, value: T) -> NodeHandle {
        let (slot, generation) = self.arena.insert(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(head) => self.arena[head].prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.len += 1;
        self.handle(slot, generation)
    }

    /// Remove and return the tail.
    pub fn pop(&mut self) -> Option<T> {
        let slot = self.tail?;
        Some(self.unlink(slot))
    }

    /// Remove and return the head.
    pub fn shift(&mut self) -> Option<T> {
        let slot = self.head?;
        Some(self.unlink(slot))
    }

    /// Detach up to `n` items from the head into a new list, keeping their
    /// relative order.
    pub fn shift_n(&mut self, n: usize) -> OrderedList<T> {
        let mut out = OrderedList::with_capacity(n.min(self.len));
        for _ in 0..n {
            match self.shift() {
                Some(value) => {
                    out.push(value);
                }
                None => break,
            }
        }
        out
    }

    /// Detach up to `n` items from the tail into a new list, keeping their
    /// relative order.
    pub fn pop_n(&mut self, n: usize) -> OrderedList<T> {
        let mut out = OrderedList::with_capacity(n.min(self.len));
        for _ in 0..n {
            match self.pop() {
                Some(value) => {
                    out.unshift(value);
                }
                None => break,
            }
        }
        out
    }

    /// Remove the member named by `handle`.
    ///
    /// A stale handle (its node was already removed) yields `Ok(None)`. A
    /// handle issued by a different list is a caller bug and yields
    /// [`ListError::ForeignHandle`].
    pub fn remove(&mut self, handle: NodeHandle) -> Result<Option<T>, ListError> {
        match self.resolve(handle)? {
            Some(slot) => Ok(Some(self.unlink(slot))),
            None => Ok(None),
        }
    }

    /// True if `handle` names a current member of this list.
    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.member(handle).is_some()
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&T> {
        let slot = self.member(handle)?;
        Some(&self.arena[slot].value)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut T> {
        let slot = self.member(handle)?;
        Some(&mut self.arena[slot].value)
    }

    pub fn head(&self) -> Option<NodeHandle> {
        self.head.map(|slot| self.live_handle(slot))
    }

    pub fn tail(&self) -> Option<NodeHandle> {
        self.tail.map(|slot| self.live_handle(slot))
    }

    /// Peek at the head payload.
    pub fn front(&self) -> Option<&T> {
        self.head.map(|slot| &self.arena[slot].value)
    }

    /// Peek at the tail payload.
    pub fn back(&self) -> Option<&T> {
        self.tail.map(|slot| &self.arena[slot].value)
    }

    /// Member after `handle`; `None` at the tail or for a non-member.
    pub fn next(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let slot = self.member(handle)?;
        self.arena[slot].next.map(|s| self.live_handle(s))
    }

    /// Member before `handle`; `None` at the head or for a non-member.
    pub fn prev(&self, handle: NodeHandle) -> Option<NodeHandle> {
        let slot = self.member(handle)?;
        self.arena[slot].prev.map(|s| self.live_handle(s))
    }

    pub fn has_next(&self, handle: NodeHandle) -> bool {
        self.member(handle)
            .map_or(false, |slot| self.arena[slot].next.is_some())
    }

    pub fn has_prev(&self, handle: NodeHandle) -> bool {
        self.member(handle)
            .map_or(false, |slot| self.arena[slot].prev.is_some())
    }

    /// Lazy forward enumeration from the current head.
    pub fn elements(&self) -> Elements<'_, T> {
        Elements {
            list: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Alias of [`elements`](Self::elements).
    pub fn iter(&self) -> Elements<'_, T> {
        self.elements()
    }

    /// Drop every node. All outstanding handles go stale.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn handle(&self, slot: u32, generation: u32) -> NodeHandle {
        NodeHandle {
            list: self.id,
            slot,
            generation,
        }
    }

    /// Handle for a slot known to be linked into this list.
    fn live_handle(&self, slot: u32) -> NodeHandle {
        self.handle(slot, self.arena.generation(slot))
    }

    fn resolve(&self, handle: NodeHandle) -> Result<Option<u32>, ListError> {
        if handle.list != self.id {
            return Err(ListError::ForeignHandle {
                handle,
                owner: handle.list,
                list: self.id,
            });
        }
        if self.arena.is_live(handle.slot, handle.generation) {
            Ok(Some(handle.slot))
        } else {
            Ok(None)
        }
    }

    fn member(&self, handle: NodeHandle) -> Option<u32> {
        self.resolve(handle).ok().flatten()
    }

    fn unlink(&mut self, slot: u32) -> T {
        let node = match self.arena.remove(slot) {
            Some(node) => node,
            None => panic!("unlink of vacant slot {slot} in list {}", self.id),
        };
        match node.prev {
            Some(prev) => self.arena[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.arena[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;
        node.value
    }
}

impl<T> Default for OrderedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deep copy: payloads are cloned and the copy gets its own identity, so no
/// handle of one list is a member of the other.
impl<T: Clone> Clone for OrderedList<T> {
    fn clone(&self) -> Self {
        let mut out = OrderedList::with_capacity(self.len);
        for value in self.elements() {
            out.push(value.clone());
        }
        out
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elements()).finish()
    }
}

impl<T> FromIterator<T> for OrderedList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = OrderedList::new();
        list.extend(iter);
        list
    }
}

impl<T> Extend<T> for OrderedList<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, T> IntoIterator for &'a OrderedList<T> {
    type Item = &'a T;
    type IntoIter = Elements<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements()
    }
}

impl<T> IntoIterator for OrderedList<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { list: self }
    }
}

/// Forward enumeration over an [`OrderedList`].
pub struct Elements<'a, T> {
    list: &'a OrderedList<T>,
    cursor: Option<u32>,
    remaining: usize,
}

impl<'a, T> Elements<'a, T> {
    pub fn has_more_elements(&self) -> bool {
        self.cursor.is_some()
    }

    /// Like [`Iterator::next`] but reports exhaustion as an error.
    pub fn next_element(&mut self) -> Result<&'a T, ListError> {
        self.next().ok_or(ListError::Exhausted)
    }
}

impl<'a, T> Iterator for Elements<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let slot = self.cursor?;
        let node = &self.list.arena[slot];
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Elements<'_, T> {}
impl<T> FusedIterator for Elements<'_, T> {}

/// Owning iterator that drains from the head.
pub struct IntoIter<T> {
    list: OrderedList<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.list.shift()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.list.len(), Some(self.list.len()))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        self.list.pop()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

#[cfg(test)]
#[path = "ordered_tests.rs"]
mod tests;
