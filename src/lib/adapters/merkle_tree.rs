use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::commitment::Commitment;
use crate::domain::field::FieldElement;
use crate::domain::merkle::{IncrementalMerkleTree, MerklePath, TreeError};
use crate::domain::root_history::RootHistory;
use crate::ports::hasher::FieldHasher;

/// Local Merkle tree adapter that wraps `IncrementalMerkleTree` with root history tracking.
///
/// Mirrors the pool contract's state: the same roots, the same `isKnownRoot` window,
/// plus a commitment -> leaf index map so lookups don't scan the leaves.
#[derive(Debug, Clone)]
pub struct LocalMerkleTree {
    tree: IncrementalMerkleTree,
    root_history: RootHistory,
    indices: HashMap<Commitment, u64>,
}

impl LocalMerkleTree {
    pub fn new(
        depth: u32,
        zero_leaf: FieldElement,
        hasher: Arc<dyn FieldHasher>,
        root_history_size: usize,
    ) -> Result<Self, TreeError> {
        Ok(Self {
            tree: IncrementalMerkleTree::new(depth, zero_leaf, hasher)?,
            root_history: RootHistory::new(root_history_size),
            indices: HashMap::new(),
        })
    }

    /// Initialize the tree and record the empty-tree root, as the contract's constructor does.
    pub fn initialize(&mut self) -> Result<(), TreeError> {
        self.tree.initialize()?;
        if self.root_history.is_empty() {
            self.root_history.push(self.tree.root()?);
        }
        Ok(())
    }

    /// Insert a commitment and record the new root in history.
    pub fn insert_commitment(&mut self, commitment: &Commitment) -> Result<u64, TreeError> {
        let index = self.tree.insert(commitment.as_field())?;
        // First occurrence wins; the pool never emits the same commitment twice.
        self.indices.entry(*commitment).or_insert(index);
        self.root_history.push(self.tree.root()?);
        Ok(index)
    }

    /// Check if a root is still inside the history window (mirrors on-chain `isKnownRoot`).
    pub fn is_known_root(&self, root: &FieldElement) -> bool {
        self.root_history.is_known(root)
    }

    pub fn current_root(&self) -> Result<FieldElement, TreeError> {
        self.tree.root()
    }

    pub fn generate_proof(&self, leaf_index: u64) -> Result<MerklePath, TreeError> {
        self.tree.path(leaf_index)
    }

    pub fn generate_proofs(&self, leaf_indices: &[u64]) -> Result<Vec<MerklePath>, TreeError> {
        self.tree.paths(leaf_indices)
    }

    pub fn leaf_index(&self, commitment: &Commitment) -> Option<u64> {
        self.indices.get(commitment).copied()
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.indices.contains_key(commitment)
    }

    pub fn len(&self) -> u64 {
        self.tree.leaf_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root_history(&self) -> &RootHistory {
        &self.root_history
    }

    pub fn tree(&self) -> &IncrementalMerkleTree {
        &self.tree
    }
}
