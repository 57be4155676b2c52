use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::crypto::HasherKind;
use crate::domain::events::DepositRecord;
use crate::domain::field::FieldElement;
use crate::domain::nullifier::NullifierHash;

/// Everything needed to resume a pool without replaying from its deployment block.
///
/// The tree is rebuilt from `deposits` (in leaf order); `depth`, `zero_value`, `hasher`
/// and `root` let the loader reject a checkpoint written for a different tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCheckpoint {
    pub pool: Address,
    pub depth: u32,
    pub zero_value: FieldElement,
    pub hasher: HasherKind,
    pub last_synced_block: u64,
    pub root: FieldElement,
    pub deposits: Vec<DepositRecord>,
    pub nullifiers: Vec<NullifierHash>,
}

/// Port for checkpointing sync progress (one checkpoint per pool).
///
/// Implementations:
/// - `InMemoryCheckpointStore` (tests)
/// - `JsonFileCheckpointStore` (one JSON file per pool)
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for the pool, `None` if it has never been saved.
    fn load(
        &self,
        pool: Address,
    ) -> impl Future<Output = Result<Option<PoolCheckpoint>, StoreError>> + Send;

    /// Replace the pool's checkpoint.
    fn save(
        &self,
        checkpoint: &PoolCheckpoint,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
