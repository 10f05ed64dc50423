//! Keys waiting out a cooldown after a transient failure.
//!
//! Entries stay in insertion order, not wake-time order. With a steady clock
//! and a fixed cooldown period every entry wakes no earlier than the one
//! before it, so the due entries form a prefix taken with one `shift_n`. The
//! rare entry that wakes earlier than something queued ahead of it (a
//! shortened wake time, or a reload out of order) is tracked as a straggler
//! and checked on its own, so extraction never walks entries that are not
//! due.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Instant;

use crate::list::{NodeHandle, OrderedList};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry<K> {
    pub key: K,
    pub wake_time: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    handle: NodeHandle,
    /// Insertion sequence number.
    seq: u64,
}

pub struct CooldownQueue<K> {
    entries: OrderedList<CooldownEntry<K>>,
    by_key: HashMap<K, Slot>,
    /// Entries that may wake before an entry queued ahead of them, by
    /// insertion sequence.
    stragglers: BTreeMap<u64, K>,
    /// Latest wake time ever queued since the queue was last empty.
    high_water: Option<Instant>,
    next_seq: u64,
}

impl<K> CooldownQueue<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: OrderedList::new(),
            by_key: HashMap::new(),
            stragglers: BTreeMap::new(),
            high_water: None,
            next_seq: 0,
        }
    }

    /// Put `key` into cooldown until `wake_time`.
    ///
    /// A key already cooling keeps its place; its wake time only ever moves
    /// earlier. Returns true if the queue changed.
    pub fn add(&mut self, key: K, wake_time: Instant) -> bool {
        let Some(&slot) = self.by_key.get(&key) else {
            self.insert(key, wake_time);
            return true;
        };
        let is_head = self.entries.head() == Some(slot.handle);
        match self.entries.get_mut(slot.handle) {
            Some(entry) if wake_time < entry.wake_time => {
                entry.wake_time = wake_time;
                if !is_head {
                    self.stragglers.insert(slot.seq, key);
                }
                true
            }
            Some(_) => false,
            None => {
                // Handle went stale underneath the map. Re-insert.
                self.forget(&key);
                self.insert(key, wake_time);
                true
            }
        }
    }

    fn insert(&mut self, key: K, wake_time: Instant) {
        if self.entries.is_empty() {
            self.high_water = None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.high_water {
            Some(high) if wake_time < high => {
                self.stragglers.insert(seq, key.clone());
            }
            _ => self.high_water = Some(wake_time),
        }
        let handle = self.entries.push(CooldownEntry {
            key: key.clone(),
            wake_time,
        });
        self.by_key.insert(key, Slot { handle, seq });
    }

    /// Drop the bookkeeping for `key`, returning its slot.
    fn forget(&mut self, key: &K) -> Option<Slot> {
        let slot = self.by_key.remove(key)?;
        self.stragglers.remove(&slot.seq);
        Some(slot)
    }

    /// Detach up to `limit` entries due at `now`, in insertion order.
    pub fn take_due(&mut self, now: Instant, limit: usize) -> OrderedList<CooldownEntry<K>> {
        let prefix = self
            .entries
            .elements()
            .take(limit)
            .take_while(|e| e.wake_time <= now)
            .count();
        let mut due = self.entries.shift_n(prefix);
        for entry in &due {
            self.forget(&entry.key);
        }

        // Stragglers sit behind the first entry still cooling, so they follow
        // the prefix in insertion order.
        let mut late = Vec::new();
        for key in self.stragglers.values() {
            if due.len() + late.len() >= limit {
                break;
            }
            if self.wakeup(key).is_some_and(|wake| wake <= now) {
                late.push(key.clone());
            }
        }
        for key in late {
            if let Some(slot) = self.forget(&key) {
                if let Ok(Some(entry)) = self.entries.remove(slot.handle) {
                    due.push(entry);
                }
            }
        }
        due
    }

    /// Drop `key` from the queue, returning its wake time.
    pub fn remove(&mut self, key: &K) -> Option<Instant> {
        let slot = self.forget(key)?;
        self.entries
            .remove(slot.handle)
            .ok()
            .flatten()
            .map(|entry| entry.wake_time)
    }

    /// Wake time of `key`, if it is cooling.
    pub fn wakeup(&self, key: &K) -> Option<Instant> {
        let slot = self.by_key.get(key)?;
        self.entries.get(slot.handle).map(|e| e.wake_time)
    }

    /// True if `key` is queued and not yet due at `now`.
    pub fn is_cooling(&self, key: &K, now: Instant) -> bool {
        self.wakeup(key).is_some_and(|wake| wake > now)
    }

    /// Earliest wake time across all entries.
    ///
    /// Every entry that is not a straggler wakes no earlier than the head,
    /// so only the head and the stragglers need looking at.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let head = self.entries.front().map(|e| e.wake_time);
        self.stragglers
            .values()
            .filter_map(|key| self.wakeup(key))
            .chain(head)
            .min()
    }

    /// Number of entries tracked out of wake-time order.
    pub fn straggler_count(&self) -> usize {
        self.stragglers.len()
    }

    /// Copy of every entry, for persistence.
    pub fn snapshot(&self) -> Vec<CooldownEntry<K>> {
        self.entries.elements().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Default for CooldownQueue<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
