use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::field::FieldElement;
use crate::ports::hasher::{FieldHasher, HasherError};

/// Deepest tree supported (2^32 leaves), same bound as the pool contract.
pub const MAX_TREE_DEPTH: u32 = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree used before initialize()")]
    NotInitialized,

    #[error("tree is full ({capacity} leaves)")]
    TreeFull { capacity: u64 },

    #[error("leaf index {index} out of bounds ({leaf_count} leaves)")]
    IndexOutOfBounds { index: u64, leaf_count: u64 },

    #[error("tree depth must be between 1 and 32, got {0}")]
    InvalidDepth(u32),

    #[error(transparent)]
    Hasher(#[from] HasherError),
}

/// Roots of empty subtrees, one per level: `zeros[0]` is the empty leaf and
/// `zeros[i] = hash(zeros[i-1], zeros[i-1])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeroValues(Vec<FieldElement>);

impl ZeroValues {
    /// Compute `depth + 1` entries. Fails if the hasher is not ready; there is no fallback.
    pub fn compute(
        depth: u32,
        zero_leaf: FieldElement,
        hasher: &dyn FieldHasher,
    ) -> Result<Self, HasherError> {
        let mut zeros = Vec::with_capacity(depth as usize + 1);
        zeros.push(zero_leaf);
        for level in 0..depth as usize {
            let below = zeros[level];
            zeros.push(hasher.hash(&below, &below)?);
        }
        Ok(Self(zeros))
    }

    pub fn get(&self, level: usize) -> FieldElement {
        self.0[level]
    }

    /// The canonical empty-tree root.
    pub fn empty_root(&self) -> FieldElement {
        self.0[self.0.len() - 1]
    }

    pub fn as_slice(&self) -> &[FieldElement] {
        &self.0
    }
}

/// Sibling path for one leaf.
///
/// `path_indices[i]` is 0 when the node at level `i` is a left child, 1 when it is a
/// right child. Both vectors have one entry per level, leaf level first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    pub leaf_index: u64,
    pub path_elements: Vec<FieldElement>,
    pub path_indices: Vec<u8>,
    pub root: FieldElement,
}

impl MerklePath {
    /// Fold `leaf` with the siblings, bottom up.
    pub fn compute_root(
        &self,
        leaf: &FieldElement,
        hasher: &dyn FieldHasher,
    ) -> Result<FieldElement, HasherError> {
        let mut current = *leaf;
        for (sibling, bit) in self.path_elements.iter().zip(&self.path_indices) {
            current = if *bit == 0 {
                hasher.hash(&current, sibling)?
            } else {
                hasher.hash(sibling, &current)?
            };
        }
        Ok(current)
    }

    pub fn verify(
        &self,
        leaf: &FieldElement,
        hasher: &dyn FieldHasher,
    ) -> Result<bool, HasherError> {
        Ok(self.compute_root(leaf, hasher)? == self.root)
    }
}

/// Per-call memo of frontier nodes rebuilt while serving paths.
type NodeMemo = HashMap<(usize, u64), FieldElement>;

/// Append-only Merkle tree of fixed depth, updated in O(depth) per insert exactly like
/// the pool contract's `_insert`.
///
/// Besides the contract state (`filled_subtrees`, current root) it keeps the raw leaves
/// and every node whose subtree is completely filled. Those nodes never change again,
/// so a path only needs to rebuild the few nodes on the partially filled right edge.
#[derive(Debug, Clone)]
pub struct IncrementalMerkleTree {
    depth: u32,
    zero_leaf: FieldElement,
    hasher: Arc<dyn FieldHasher>,
    leaves: Vec<FieldElement>,
    filled_subtrees: Vec<FieldElement>,
    zero_values: Option<ZeroValues>,
    current_root: FieldElement,
    initialized: bool,
    /// `completed[level][i]` is node `(level, i)`; level 0 is unused (leaves cover it).
    completed: Vec<Vec<FieldElement>>,
}

impl IncrementalMerkleTree {
    pub fn new(
        depth: u32,
        zero_leaf: FieldElement,
        hasher: Arc<dyn FieldHasher>,
    ) -> Result<Self, TreeError> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(TreeError::InvalidDepth(depth));
        }
        Ok(Self {
            depth,
            zero_leaf,
            hasher,
            leaves: Vec::new(),
            filled_subtrees: Vec::new(),
            zero_values: None,
            current_root: FieldElement::ZERO,
            initialized: false,
            completed: Vec::new(),
        })
    }

    /// Compute the zero table and reset to the empty tree. Calling it again on an
    /// initialized tree does nothing.
    pub fn initialize(&mut self) -> Result<(), TreeError> {
        if self.initialized {
            return Ok(());
        }
        let zeros = ZeroValues::compute(self.depth, self.zero_leaf, self.hasher.as_ref())?;
        self.filled_subtrees = zeros.as_slice()[..self.depth as usize].to_vec();
        self.current_root = zeros.empty_root();
        self.completed = vec![Vec::new(); self.depth as usize + 1];
        self.zero_values = Some(zeros);
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Append a leaf and return its index.
    ///
    /// Every hash is computed before any field is touched, so a failing hasher
    /// leaves the tree exactly as it was.
    pub fn insert(&mut self, leaf: FieldElement) -> Result<u64, TreeError> {
        let zeros = self.zeros()?;
        let capacity = self.capacity();
        let index = self.leaves.len() as u64;
        if index >= capacity {
            return Err(TreeError::TreeFull { capacity });
        }

        let depth = self.depth as usize;
        let mut filled = Vec::with_capacity(depth);
        let mut completed = Vec::with_capacity(depth);
        let mut current = leaf;
        let mut current_index = index;

        for level in 0..depth {
            let (left, right) = if current_index % 2 == 0 {
                filled.push((level, current));
                (current, zeros.get(level))
            } else {
                (self.filled_subtrees[level], current)
            };
            current = self.hasher.hash(&left, &right)?;
            current_index /= 2;

            // (level + 1, current_index) is complete once its last leaf lands.
            if (index + 1) % (1u64 << (level + 1)) == 0 {
                completed.push((level + 1, current));
            }
        }

        for (level, value) in filled {
            self.filled_subtrees[level] = value;
        }
        for (level, value) in completed {
            self.completed[level].push(value);
        }
        self.leaves.push(leaf);
        self.current_root = current;
        Ok(index)
    }

    pub fn root(&self) -> Result<FieldElement, TreeError> {
        self.ensure_initialized()?;
        Ok(self.current_root)
    }

    pub fn path(&self, leaf_index: u64) -> Result<MerklePath, TreeError> {
        let mut memo = NodeMemo::new();
        self.path_with_memo(leaf_index, &mut memo)
    }

    /// Paths for several leaves, sharing one node memo across the batch.
    pub fn paths(&self, leaf_indices: &[u64]) -> Result<Vec<MerklePath>, TreeError> {
        let mut memo = NodeMemo::new();
        leaf_indices
            .iter()
            .map(|&index| self.path_with_memo(index, &mut memo))
            .collect()
    }

    fn path_with_memo(
        &self,
        leaf_index: u64,
        memo: &mut NodeMemo,
    ) -> Result<MerklePath, TreeError> {
        self.ensure_initialized()?;
        let leaf_count = self.leaf_count();
        if leaf_index >= leaf_count {
            return Err(TreeError::IndexOutOfBounds {
                index: leaf_index,
                leaf_count,
            });
        }

        let depth = self.depth as usize;
        let mut path_elements = Vec::with_capacity(depth);
        let mut path_indices = Vec::with_capacity(depth);
        let mut index = leaf_index;
        for level in 0..depth {
            path_elements.push(self.node(level, index ^ 1, memo)?);
            path_indices.push((index & 1) as u8);
            index >>= 1;
        }

        Ok(MerklePath {
            leaf_index,
            path_elements,
            path_indices,
            root: self.current_root,
        })
    }

    /// Hash of node `(level, index)`: a zero value when its leaf range is empty,
    /// the stored node when its range is full, otherwise rebuilt from its children.
    fn node(
        &self,
        level: usize,
        index: u64,
        memo: &mut NodeMemo,
    ) -> Result<FieldElement, TreeError> {
        let zeros = self.zeros()?;
        if (index << level) >= self.leaf_count() {
            return Ok(zeros.get(level));
        }
        if level == 0 {
            return Ok(self.leaves[index as usize]);
        }
        if let Some(node) = self.completed[level].get(index as usize) {
            return Ok(*node);
        }
        if let Some(node) = memo.get(&(level, index)) {
            return Ok(*node);
        }
        let left = self.node(level - 1, index * 2, memo)?;
        let right = self.node(level - 1, index * 2 + 1, memo)?;
        let node = self.hasher.hash(&left, &right)?;
        memo.insert((level, index), node);
        Ok(node)
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn has_leaf(&self, leaf: &FieldElement) -> bool {
        self.leaves.contains(leaf)
    }

    pub fn leaf_index(&self, leaf: &FieldElement) -> Option<u64> {
        self.leaves.iter().position(|l| l == leaf).map(|i| i as u64)
    }

    pub fn leaves(&self) -> &[FieldElement] {
        &self.leaves
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn zero_leaf(&self) -> FieldElement {
        self.zero_leaf
    }

    pub fn zero_values(&self) -> Result<&ZeroValues, TreeError> {
        self.zeros()
    }

    pub fn filled_subtrees(&self) -> &[FieldElement] {
        &self.filled_subtrees
    }

    pub fn hasher(&self) -> &Arc<dyn FieldHasher> {
        &self.hasher
    }

    fn zeros(&self) -> Result<&ZeroValues, TreeError> {
        self.zero_values.as_ref().ok_or(TreeError::NotInitialized)
    }

    fn ensure_initialized(&self) -> Result<(), TreeError> {
        if !self.initialized {
            return Err(TreeError::NotInitialized);
        }
        Ok(())
    }
}
