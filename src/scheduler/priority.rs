//! Request prioritization.
//!
//! Pending requesters wait in one FIFO tier per [`Priority`]. How priorities
//! are computed is the requester's business; the tiers only consume them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use super::requester::{Requester, RequesterId};
use crate::fetch::BlockKey;
use crate::list::{NodeHandle, OrderedList};

/// Priority level for fetch requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Every level, most urgent first.
    pub const DESCENDING: [Priority; 4] =
        [Self::Critical, Self::High, Self::Normal, Self::Low];

    fn tier(self) -> usize {
        self as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// A requester waiting to be picked for dispatch.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: RequesterId,
    pub key: BlockKey,
    pub priority: Priority,
    requester: Weak<dyn Requester>,
}

impl PendingEntry {
    /// The requester, unless its owner has dropped it.
    pub fn upgrade(&self) -> Option<Arc<dyn Requester>> {
        self.requester.upgrade()
    }
}

/// One FIFO tier per priority level.
pub struct PendingTiers {
    tiers: [OrderedList<PendingEntry>; 4],
    by_id: HashMap<RequesterId, (Priority, NodeHandle)>,
}

impl PendingTiers {
    pub fn new() -> Self {
        Self {
            tiers: std::array::from_fn(|_| OrderedList::new()),
            by_id: HashMap::new(),
        }
    }

    /// Queue `requester` at the tail of its tier. False if already queued.
    pub fn push(
        &mut self,
        requester: &Arc<dyn Requester>,
        key: BlockKey,
        priority: Priority,
    ) -> bool {
        let id = RequesterId::of(requester);
        if self.by_id.contains_key(&id) {
            return false;
        }
        let handle = self.tiers[priority.tier()].push(PendingEntry {
            id,
            key,
            priority,
            requester: Arc::downgrade(requester),
        });
        self.by_id.insert(id, (priority, handle));
        true
    }

    /// Take the oldest entry of the most urgent non-empty tier.
    pub fn pop(&mut self) -> Option<PendingEntry> {
        for priority in Priority::DESCENDING {
            if let Some(entry) = self.tiers[priority.tier()].shift() {
                self.by_id.remove(&entry.id);
                return Some(entry);
            }
        }
        None
    }

    /// Drop a queued requester. False if it was not queued.
    pub fn remove(&mut self, id: RequesterId) -> bool {
        let Some((priority, handle)) = self.by_id.remove(&id) else {
            return false;
        };
        matches!(self.tiers[priority.tier()].remove(handle), Ok(Some(_)))
    }

    pub fn contains(&self, id: RequesterId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Entries of one tier, oldest first.
    pub fn tier(&self, priority: Priority) -> &OrderedList<PendingEntry> {
        &self.tiers[priority.tier()]
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for PendingTiers {
    fn default() -> Self {
        Self::new()
    }
}
