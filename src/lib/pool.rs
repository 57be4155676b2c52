use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::adapters::merkle_tree::LocalMerkleTree;
use crate::crypto::{build_hasher, HasherKind};
use crate::domain::commitment::Commitment;
use crate::domain::events::{DepositEvent, DepositRecord};
use crate::domain::field::FieldElement;
use crate::domain::merkle::{MerklePath, TreeError};
use crate::domain::nullifier::{NullifierHash, NullifierSet};
use crate::domain::root_history::DEFAULT_ROOT_HISTORY_SIZE;
use crate::ports::hasher::FieldHasher;
use crate::ports::store::PoolCheckpoint;

/// Static description of one deployed pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolParams {
    pub address: Address,
    pub depth: u32,
    /// `zeroValues[0]`, the empty leaf.
    pub zero_value: FieldElement,
    pub root_history_size: usize,
    pub deployment_block: u64,
    pub hasher: HasherKind,
}

impl PoolParams {
    pub fn new(address: Address, depth: u32, zero_value: FieldElement) -> Self {
        Self {
            address,
            depth,
            zero_value,
            root_history_size: DEFAULT_ROOT_HISTORY_SIZE,
            deployment_block: 0,
            hasher: HasherKind::Mimc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Uninitialized,
    Backfilling,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    /// Retries exhausted; the engine keeps trying.
    Degraded(String),
    /// Unrecoverable for this pool; the engine has stopped.
    Halted(String),
}

/// Snapshot served by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub address: Address,
    pub phase: SyncPhase,
    pub health: PoolHealth,
    pub last_synced_block: u64,
    pub deposits_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootSnapshot {
    pub root: FieldElement,
    pub deposits_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("leaf index {index} out of bounds ({leaf_count} leaves)")]
    IndexOutOfBounds { index: u64, leaf_count: u64 },

    #[error("leaf {index} not indexed yet ({leaf_count} leaves synced), retry later")]
    NotYetSynced { index: u64, leaf_count: u64 },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Mutable per-pool state. Only the pool's sync engine writes it.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub tree: LocalMerkleTree,
    pub nullifiers: NullifierSet,
    pub deposits: HashMap<Commitment, DepositRecord>,
    pub last_synced_block: u64,
    pub phase: SyncPhase,
    pub health: PoolHealth,
}

impl PoolState {
    /// Insert the deposit's commitment at the next leaf. The caller has already
    /// checked that `event.leaf_index` is that next leaf.
    pub fn apply_deposit(&mut self, event: &DepositEvent) -> Result<u64, TreeError> {
        debug_assert_eq!(event.leaf_index, self.tree.len());
        let index = self.tree.insert_commitment(&event.commitment)?;
        self.deposits
            .insert(event.commitment, DepositRecord::from(event));
        Ok(index)
    }

    /// Block of the newest applied deposit.
    pub fn last_deposit_block(&self) -> Option<u64> {
        let last = self.tree.len().checked_sub(1)?;
        let leaf = self.tree.tree().leaves().get(last as usize)?;
        self.deposits
            .get(&Commitment(*leaf))
            .map(|record| record.block_number)
    }
}

/// One pool: its parameters, hash backend and the state behind a reader-writer lock.
///
/// HTTP handlers take the read lock; the sync engine takes the write lock once per
/// applied event, so readers only ever see whole inserts.
#[derive(Debug)]
pub struct Pool {
    params: PoolParams,
    hasher: Arc<dyn FieldHasher>,
    state: RwLock<PoolState>,
}

impl Pool {
    /// Build the pool with the native backend named in `params`.
    pub fn new(params: PoolParams) -> Result<Self, TreeError> {
        let hasher = build_hasher(params.hasher);
        Self::with_hasher(params, hasher)
    }

    pub fn with_hasher(
        params: PoolParams,
        hasher: Arc<dyn FieldHasher>,
    ) -> Result<Self, TreeError> {
        hasher.initialize()?;
        let state = Self::empty_state(&params, &hasher)?;
        Ok(Self {
            params,
            hasher,
            state: RwLock::new(state),
        })
    }

    fn empty_state(
        params: &PoolParams,
        hasher: &Arc<dyn FieldHasher>,
    ) -> Result<PoolState, TreeError> {
        let mut tree = LocalMerkleTree::new(
            params.depth,
            params.zero_value,
            Arc::clone(hasher),
            params.root_history_size,
        )?;
        tree.initialize()?;
        Ok(PoolState {
            tree,
            nullifiers: NullifierSet::new(),
            deposits: HashMap::new(),
            // Genesis never holds pool logs, so 0 is a safe "nothing synced" cursor.
            last_synced_block: params.deployment_block.saturating_sub(1),
            phase: SyncPhase::Uninitialized,
            health: PoolHealth::Healthy,
        })
    }

    /// A fresh, initialized, empty state for this pool.
    pub fn fresh_state(&self) -> Result<PoolState, TreeError> {
        Self::empty_state(&self.params, &self.hasher)
    }

    pub fn address(&self) -> Address {
        self.params.address
    }

    pub fn params(&self) -> &PoolParams {
        &self.params
    }

    pub fn hasher(&self) -> &Arc<dyn FieldHasher> {
        &self.hasher
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, PoolState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, PoolState> {
        self.state.write().await
    }

    pub async fn set_phase(&self, phase: SyncPhase) {
        self.state.write().await.phase = phase;
    }

    pub async fn set_health(&self, health: PoolHealth) {
        self.state.write().await.health = health;
    }

    // ── Proof-input queries ──

    pub async fn latest_root(&self) -> Result<RootSnapshot, QueryError> {
        let state = self.state.read().await;
        Ok(RootSnapshot {
            root: state.tree.current_root()?,
            deposits_count: state.tree.len(),
        })
    }

    /// Sibling path for a leaf. A leaf the indexer hasn't reached yet is
    /// `NotYetSynced` while backfilling and `IndexOutOfBounds` once live.
    pub async fn path(&self, leaf_index: u64) -> Result<MerklePath, QueryError> {
        let state = self.state.read().await;
        let leaf_count = state.tree.len();
        if leaf_index >= leaf_count {
            let capacity = state.tree.tree().capacity();
            if leaf_index < capacity && state.phase != SyncPhase::Live {
                return Err(QueryError::NotYetSynced {
                    index: leaf_index,
                    leaf_count,
                });
            }
            return Err(QueryError::IndexOutOfBounds {
                index: leaf_index,
                leaf_count,
            });
        }
        Ok(state.tree.generate_proof(leaf_index)?)
    }

    pub async fn is_known_root(&self, root: &FieldElement) -> bool {
        self.state.read().await.tree.is_known_root(root)
    }

    pub async fn is_spent(&self, nullifier: &NullifierHash) -> bool {
        self.state.read().await.nullifiers.is_spent(nullifier)
    }

    pub async fn deposit(&self, commitment: &Commitment) -> Option<DepositRecord> {
        self.state.read().await.deposits.get(commitment).cloned()
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.read().await;
        PoolStatus {
            address: self.params.address,
            phase: state.phase,
            health: state.health.clone(),
            last_synced_block: state.last_synced_block,
            deposits_count: state.tree.len(),
        }
    }

    /// Persistable snapshot of the current state.
    pub async fn checkpoint(&self) -> Result<PoolCheckpoint, TreeError> {
        let state = self.state.read().await;
        let mut deposits: Vec<DepositRecord> = state.deposits.values().cloned().collect();
        deposits.sort_by_key(|d| d.leaf_index);
        Ok(PoolCheckpoint {
            pool: self.params.address,
            depth: self.params.depth,
            zero_value: self.params.zero_value,
            hasher: self.params.hasher,
            last_synced_block: state.last_synced_block,
            root: state.tree.current_root()?,
            deposits,
            nullifiers: state.nullifiers.sorted(),
        })
    }
}
