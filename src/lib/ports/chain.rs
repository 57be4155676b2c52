use alloy::primitives::B256;
use std::future::Future;

use crate::domain::events::PoolEvent;
use crate::domain::field::FieldElement;
use crate::domain::nullifier::NullifierHash;

/// Read-only port onto one deployed pool contract.
///
/// Implementations:
/// - `EthereumPoolSource` (alloy, JSON-RPC)
/// - `MockChainSource` for tests
pub trait ChainSource: Send + Sync {
    /// Current head block number.
    fn latest_block(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// Canonical hash of a block, `None` if the node doesn't know it.
    fn block_hash(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Option<B256>, ChainError>> + Send;

    /// All `Deposit` and `Withdrawal` logs in the inclusive range, in no particular order.
    fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<PoolEvent>, ChainError>> + Send;

    /// Contract view `isKnownRoot(root)`.
    fn is_known_root(
        &self,
        root: FieldElement,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// Contract view `isSpent(nullifierHash)`.
    fn is_spent(
        &self,
        nullifier: NullifierHash,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// `hashLeftRight` evaluated by the deployed hasher contract, or `None` when no
    /// hasher contract is configured. Only used for a one-time compatibility check.
    fn hash_left_right(
        &self,
        left: FieldElement,
        right: FieldElement,
    ) -> impl Future<Output = Result<Option<FieldElement>, ChainError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("block not found: {0}")]
    BlockNotFound(u64),
}
