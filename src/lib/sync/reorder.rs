use std::collections::BTreeMap;

use crate::domain::events::DepositEvent;

/// Deposits that arrived ahead of their turn, keyed by on-chain leaf index.
///
/// Deposits leave the buffer strictly in leaf-index order, whatever order they
/// arrived in.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: BTreeMap<u64, DepositEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffered {
    Added,
    /// The same deposit was already waiting.
    Duplicate,
    /// A different commitment is already waiting at this leaf index.
    Conflict(DepositEvent),
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: DepositEvent) -> Buffered {
        match self.pending.get(&event.leaf_index) {
            Some(existing) if existing.commitment == event.commitment => Buffered::Duplicate,
            Some(existing) => Buffered::Conflict(existing.clone()),
            None => {
                self.pending.insert(event.leaf_index, event);
                Buffered::Added
            }
        }
    }

    /// Take the deposit for `next_leaf`, if it has arrived.
    pub fn pop_next(&mut self, next_leaf: u64) -> Option<DepositEvent> {
        self.pending.remove(&next_leaf)
    }

    /// Lowest buffered leaf index.
    pub fn first_index(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
