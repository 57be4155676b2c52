use std::collections::VecDeque;

use super::field::FieldElement;

/// Number of roots the pool contract remembers (`ROOT_HISTORY_SIZE`).
pub const DEFAULT_ROOT_HISTORY_SIZE: usize = 30;

/// Bounded window of recent roots, oldest evicted first.
///
/// A proof built against a root stays submittable until that root rolls out of the
/// window, which mirrors the contract's `isKnownRoot`.
#[derive(Debug, Clone)]
pub struct RootHistory {
    capacity: usize,
    roots: VecDeque<FieldElement>,
}

impl RootHistory {
    /// A zero capacity is bumped to one so the current root is always known.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            roots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, root: FieldElement) {
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    /// The all-zero root is never known, matching the contract's guard.
    pub fn is_known(&self, root: &FieldElement) -> bool {
        if root.is_zero() {
            return false;
        }
        self.roots.contains(root)
    }

    pub fn latest(&self) -> Option<FieldElement> {
        self.roots.back().copied()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.roots.clear();
    }

    /// Roots oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &FieldElement> {
        self.roots.iter()
    }
}

impl Default for RootHistory {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_HISTORY_SIZE)
    }
}
