use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::commitment::Commitment;
use super::nullifier::NullifierHash;

/// Block an event was mined in. The hash is kept so a later reorg can be noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: B256,
}

/// `Deposit(bytes32 indexed commitment, uint256 leafIndex, uint256 timestamp)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub commitment: Commitment,
    /// Leaf index assigned on-chain; the only valid insertion order.
    pub leaf_index: u64,
    pub timestamp: u64,
    pub block: BlockRef,
    pub log_index: u64,
}

/// `Withdrawal(address recipient, bytes32 nullifierHash, address indexed relayer, uint256 fee)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalEvent {
    pub nullifier_hash: NullifierHash,
    pub recipient: Address,
    pub relayer: Address,
    pub fee: U256,
    pub block: BlockRef,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
}

impl From<DepositEvent> for PoolEvent {
    fn from(event: DepositEvent) -> Self {
        PoolEvent::Deposit(event)
    }
}

impl From<WithdrawalEvent> for PoolEvent {
    fn from(event: WithdrawalEvent) -> Self {
        PoolEvent::Withdrawal(event)
    }
}

impl PoolEvent {
    pub fn block(&self) -> BlockRef {
        match self {
            PoolEvent::Deposit(d) => d.block,
            PoolEvent::Withdrawal(w) => w.block,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            PoolEvent::Deposit(d) => d.log_index,
            PoolEvent::Withdrawal(w) => w.log_index,
        }
    }

    /// Canonical chain position, used to sort a fetched range before applying it.
    pub fn position(&self) -> (u64, u64) {
        (self.block().number, self.log_index())
    }
}

/// What the indexer remembers about an applied deposit; served by the deposit lookup
/// and persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub commitment: Commitment,
    pub leaf_index: u64,
    pub timestamp: u64,
    pub block_number: u64,
}

impl From<&DepositEvent> for DepositRecord {
    fn from(event: &DepositEvent) -> Self {
        Self {
            commitment: event.commitment,
            leaf_index: event.leaf_index,
            timestamp: event.timestamp,
            block_number: event.block.number,
        }
    }
}

/// Order events by (block number, log index).
pub fn sort_events(events: &mut [PoolEvent]) {
    events.sort_by_key(PoolEvent::position);
}
