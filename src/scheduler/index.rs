//! Coalescing table: which requesters wait on which key.
//!
//! The index holds weak back-references only. A requester appears under at
//! most one key, and a key with no requesters has no entry.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use super::requester::RequesterId;
use crate::list::{NodeHandle, OrderedList};

struct Registration<R: ?Sized> {
    id: RequesterId,
    requester: Weak<R>,
    /// False once the requester only watches for the outcome.
    driving: bool,
}

/// Requesters coalesced on one key, in registration order.
struct CoalescingSet<R: ?Sized> {
    members: OrderedList<Registration<R>>,
    by_id: HashMap<RequesterId, NodeHandle>,
}

impl<R: ?Sized> CoalescingSet<R> {
    fn new() -> Self {
        Self {
            members: OrderedList::new(),
            by_id: HashMap::new(),
        }
    }
}

pub struct RequestIndex<K, R: ?Sized> {
    sets: HashMap<K, CoalescingSet<R>>,
    owners: HashMap<RequesterId, K>,
}

impl<K, R> RequestIndex<K, R>
where
    K: Eq + Hash + Clone,
    R: ?Sized,
{
    pub fn new() -> Self {
        Self {
            sets: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Add `requester` to the set for `key`.
    ///
    /// Returns false if it was already registered under `key`; it drives
    /// dispatch again either way. A requester registered under a different
    /// key is moved.
    pub fn register(&mut self, key: K, requester: &Arc<R>) -> bool {
        let id = RequesterId::of(requester);
        if let Some(current) = self.owners.get(&id) {
            if *current == key {
                self.set_driving(&key, id, true);
                return false;
            }
            let previous = current.clone();
            self.unregister_id(&previous, id);
        }
        let set = self.sets.entry(key.clone()).or_insert_with(CoalescingSet::new);
        let handle = set.members.push(Registration {
            id,
            requester: Arc::downgrade(requester),
            driving: true,
        });
        set.by_id.insert(id, handle);
        self.owners.insert(id, key);
        true
    }

    /// Detach the whole set for `key` and delete the entry.
    ///
    /// Requesters whose owners dropped them are skipped.
    pub fn resolve(&mut self, key: &K) -> Vec<Arc<R>> {
        let Some(set) = self.sets.remove(key) else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(set.members.len());
        for registration in set.members {
            self.owners.remove(&registration.id);
            if let Some(requester) = registration.requester.upgrade() {
                live.push(requester);
            }
        }
        live
    }

    /// Remove one requester from `key`. False if it was not registered there.
    pub fn unregister(&mut self, key: &K, requester: &Arc<R>) -> bool {
        self.unregister_id(key, RequesterId::of(requester))
    }

    pub fn unregister_id(&mut self, key: &K, id: RequesterId) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let Some(handle) = set.by_id.remove(&id) else {
            return false;
        };
        let _ = set.members.remove(handle);
        if set.members.is_empty() {
            self.sets.remove(key);
        }
        self.owners.remove(&id);
        true
    }

    /// Drop registrations on `key` whose requesters no longer exist. Returns
    /// how many were dropped; an emptied set is deleted.
    pub fn prune_dead(&mut self, key: &K) -> usize {
        let Some(set) = self.sets.get_mut(key) else {
            return 0;
        };
        let mut dead = Vec::new();
        let mut cursor = set.members.head();
        while let Some(handle) = cursor {
            if let Some(registration) = set.members.get(handle) {
                if registration.requester.strong_count() == 0 {
                    dead.push((registration.id, handle));
                }
            }
            cursor = set.members.next(handle);
        }
        for (id, handle) in &dead {
            let _ = set.members.remove(*handle);
            set.by_id.remove(id);
            self.owners.remove(id);
        }
        if set.members.is_empty() {
            self.sets.remove(key);
        }
        dead.len()
    }

    /// Live requesters on `key`, without detaching them.
    pub fn requesters(&self, key: &K) -> Vec<Arc<R>> {
        self.sets.get(key).map_or_else(Vec::new, |set| {
            set.members
                .elements()
                .filter_map(|r| r.requester.upgrade())
                .collect()
        })
    }

    /// Keep `requester` indexed for the outcome but stop it driving dispatch.
    pub fn make_passive(&mut self, requester: &Arc<R>) -> bool {
        let id = RequesterId::of(requester);
        match self.owners.get(&id).cloned() {
            Some(key) => self.set_driving(&key, id, false),
            None => false,
        }
    }

    fn set_driving(&mut self, key: &K, id: RequesterId, driving: bool) -> bool {
        let Some(set) = self.sets.get_mut(key) else {
            return false;
        };
        let Some(&handle) = set.by_id.get(&id) else {
            return false;
        };
        match set.members.get_mut(handle) {
            Some(registration) => {
                registration.driving = driving;
                true
            }
            None => false,
        }
    }

    /// Live requesters on `key` that still drive dispatch.
    pub fn drivers(&self, key: &K) -> Vec<Arc<R>> {
        self.sets.get(key).map_or_else(Vec::new, |set| {
            set.members
                .elements()
                .filter(|r| r.driving)
                .filter_map(|r| r.requester.upgrade())
                .collect()
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.sets.contains_key(key)
    }

    pub fn is_registered(&self, key: &K, requester: &Arc<R>) -> bool {
        self.owners.get(&RequesterId::of(requester)) == Some(key)
    }

    /// Key the requester is currently registered under.
    pub fn key_of(&self, requester: &Arc<R>) -> Option<&K> {
        self.owners.get(&RequesterId::of(requester))
    }

    pub fn requester_count(&self, key: &K) -> usize {
        self.sets.get(key).map_or(0, |set| set.members.len())
    }

    /// Number of keys with at least one requester.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Total registrations across all keys.
    pub fn registrations(&self) -> usize {
        self.owners.len()
    }
}

impl<K, R> Default for RequestIndex<K, R>
where
    K: Eq + Hash + Clone,
    R: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}
