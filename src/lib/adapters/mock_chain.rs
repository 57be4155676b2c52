use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256, U256};
use tokio::sync::Mutex;

use crate::domain::commitment::Commitment;
use crate::domain::events::{BlockRef, DepositEvent, PoolEvent, WithdrawalEvent};
use crate::domain::field::FieldElement;
use crate::domain::nullifier::NullifierHash;
use crate::ports::chain::{ChainError, ChainSource};
use crate::ports::hasher::FieldHasher;

struct MockChainState {
    head: u64,
    events: Vec<PoolEvent>,
    next_leaf_index: u64,
    /// Fork id per block, keyed by the first block of each fork.
    forks: BTreeMap<u64, u64>,
    fork_count: u64,
    known_roots: HashSet<FieldElement>,
    spent: HashSet<NullifierHash>,
    fail_next_fetches: usize,
    fetch_calls: usize,
    missing_block_hashes: usize,
    block_hash_calls: usize,
    spent_checks: usize,
    reverse_delivery: bool,
}

impl MockChainState {
    fn block_ref(&self, number: u64) -> BlockRef {
        let fork = self
            .forks
            .range(..=number)
            .next_back()
            .map(|(_, fork)| *fork)
            .unwrap_or(0);
        let mut preimage = [0u8; 16];
        preimage[..8].copy_from_slice(&number.to_be_bytes());
        preimage[8..].copy_from_slice(&fork.to_be_bytes());
        BlockRef {
            number,
            hash: keccak256(preimage),
        }
    }

    fn next_log_index(&self, block: u64) -> u64 {
        self.events
            .iter()
            .filter(|e| e.block().number == block)
            .count() as u64
    }
}

/// Scripted pool contract for engine and HTTP tests.
///
/// Every `deposit` / `withdraw` mines a new block holding that one event, unless
/// `mine_deposits` is used to pack several into one block. Fetch failures, reversed
/// log delivery and reorgs can be injected.
pub struct MockChainSource {
    state: Mutex<MockChainState>,
    contract_hasher: Option<Arc<dyn FieldHasher>>,
}

impl MockChainSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockChainState {
                head: 0,
                events: Vec::new(),
                next_leaf_index: 0,
                forks: BTreeMap::new(),
                fork_count: 0,
                known_roots: HashSet::new(),
                spent: HashSet::new(),
                fail_next_fetches: 0,
                fetch_calls: 0,
                missing_block_hashes: 0,
                block_hash_calls: 0,
                spent_checks: 0,
                reverse_delivery: false,
            }),
            contract_hasher: None,
        }
    }

    /// Serve `hash_left_right` from this hasher, standing in for a deployed hasher contract.
    pub fn with_contract_hasher(mut self, hasher: Arc<dyn FieldHasher>) -> Self {
        self.contract_hasher = Some(hasher);
        self
    }

    /// Mine `blocks` empty blocks.
    pub async fn advance(&self, blocks: u64) -> u64 {
        let mut state = self.state.lock().await;
        state.head += blocks;
        state.head
    }

    pub async fn head(&self) -> u64 {
        self.state.lock().await.head
    }

    /// Mine one block holding a deposit at the next leaf index.
    pub async fn deposit(&self, commitment: Commitment) -> DepositEvent {
        self.mine_deposits(&[commitment]).await.remove(0)
    }

    /// Mine one block holding all the deposits, in order.
    pub async fn mine_deposits(&self, commitments: &[Commitment]) -> Vec<DepositEvent> {
        let mut state = self.state.lock().await;
        state.head += 1;
        let block = state.block_ref(state.head);
        let mut mined = Vec::with_capacity(commitments.len());
        for (i, commitment) in commitments.iter().enumerate() {
            let event = DepositEvent {
                commitment: *commitment,
                leaf_index: state.next_leaf_index,
                timestamp: 1_700_000_000 + state.head * 12,
                block,
                log_index: i as u64,
            };
            state.next_leaf_index += 1;
            state.events.push(PoolEvent::Deposit(event.clone()));
            mined.push(event);
        }
        mined
    }

    /// Mine one block holding a withdrawal and mark the nullifier spent on the contract.
    pub async fn withdraw(&self, nullifier: NullifierHash) -> WithdrawalEvent {
        let mut state = self.state.lock().await;
        state.head += 1;
        let event = WithdrawalEvent {
            nullifier_hash: nullifier,
            recipient: Address::repeat_byte(0x11),
            relayer: Address::repeat_byte(0x22),
            fee: U256::from(1_000u64),
            block: state.block_ref(state.head),
            log_index: 0,
        };
        state.spent.insert(nullifier);
        state.events.push(PoolEvent::Withdrawal(event.clone()));
        event
    }

    /// Mine a block holding an arbitrary deposit (e.g. with a skipped leaf index).
    pub async fn inject_deposit(&self, commitment: Commitment, leaf_index: u64) -> DepositEvent {
        let mut state = self.state.lock().await;
        state.head += 1;
        let block = state.block_ref(state.head);
        let event = DepositEvent {
            commitment,
            leaf_index,
            timestamp: 1_700_000_000 + state.head * 12,
            block,
            log_index: state.next_log_index(block.number),
        };
        state.next_leaf_index = state.next_leaf_index.max(leaf_index + 1);
        state.events.push(PoolEvent::Deposit(event.clone()));
        event
    }

    /// Drop every block from `from_block` on and replace it with a new fork of the
    /// same height. Returns the orphaned events.
    pub async fn reorg(&self, from_block: u64) -> Vec<PoolEvent> {
        let mut state = self.state.lock().await;
        state.fork_count += 1;
        let fork = state.fork_count;
        state.forks.retain(|&start, _| start < from_block);
        state.forks.insert(from_block, fork);

        let (orphaned, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.events)
            .into_iter()
            .partition(|e| e.block().number >= from_block);
        state.events = kept;
        state.next_leaf_index = state
            .events
            .iter()
            .filter_map(|e| match e {
                PoolEvent::Deposit(d) => Some(d.leaf_index + 1),
                PoolEvent::Withdrawal(_) => None,
            })
            .max()
            .unwrap_or(0);
        for event in &orphaned {
            if let PoolEvent::Withdrawal(w) = event {
                state.spent.remove(&w.nullifier_hash);
            }
        }
        orphaned
    }

    /// Make the next `n` `fetch_events` calls fail with an RPC error.
    pub async fn fail_next_fetches(&self, n: usize) {
        self.state.lock().await.fail_next_fetches = n;
    }

    /// Make the next `n` `block_hash` calls answer `None`, like a node that lags
    /// behind the one that served the logs.
    pub async fn miss_next_block_hashes(&self, n: usize) {
        self.state.lock().await.missing_block_hashes = n;
    }

    /// Deliver fetched logs newest first.
    pub async fn set_reverse_delivery(&self, reverse: bool) {
        self.state.lock().await.reverse_delivery = reverse;
    }

    pub async fn add_known_root(&self, root: FieldElement) {
        self.state.lock().await.known_roots.insert(root);
    }

    pub async fn fetch_calls(&self) -> usize {
        self.state.lock().await.fetch_calls
    }

    pub async fn block_hash_calls(&self) -> usize {
        self.state.lock().await.block_hash_calls
    }

    pub async fn spent_checks(&self) -> usize {
        self.state.lock().await.spent_checks
    }

    /// Current canonical hash of a block.
    pub async fn canonical_block(&self, number: u64) -> BlockRef {
        self.state.lock().await.block_ref(number)
    }
}

impl Default for MockChainSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainSource for MockChainSource {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().await.head)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ChainError> {
        let mut state = self.state.lock().await;
        state.block_hash_calls += 1;
        if state.missing_block_hashes > 0 {
            state.missing_block_hashes -= 1;
            return Ok(None);
        }
        if number > state.head {
            return Ok(None);
        }
        Ok(Some(state.block_ref(number).hash))
    }

    async fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, ChainError> {
        let mut state = self.state.lock().await;
        state.fetch_calls += 1;
        if state.fail_next_fetches > 0 {
            state.fail_next_fetches -= 1;
            return Err(ChainError::Rpc("injected fetch failure".into()));
        }

        let mut events: Vec<PoolEvent> = state
            .events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block().number))
            .cloned()
            .collect();
        if state.reverse_delivery {
            events.reverse();
        }
        Ok(events)
    }

    async fn is_known_root(&self, root: FieldElement) -> Result<bool, ChainError> {
        Ok(self.state.lock().await.known_roots.contains(&root))
    }

    async fn is_spent(&self, nullifier: NullifierHash) -> Result<bool, ChainError> {
        let mut state = self.state.lock().await;
        state.spent_checks += 1;
        Ok(state.spent.contains(&nullifier))
    }

    async fn hash_left_right(
        &self,
        left: FieldElement,
        right: FieldElement,
    ) -> Result<Option<FieldElement>, ChainError> {
        match &self.contract_hasher {
            None => Ok(None),
            Some(hasher) => hasher
                .hash(&left, &right)
                .map(Some)
                .map_err(|e| ChainError::Rpc(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deposits_get_dense_leaf_indices() {
        let chain = MockChainSource::new();
        let a = chain.deposit(Commitment::from_u64(1)).await;
        let batch = chain
            .mine_deposits(&[Commitment::from_u64(2), Commitment::from_u64(3)])
            .await;
        assert_eq!(a.leaf_index, 0);
        assert_eq!(batch[0].leaf_index, 1);
        assert_eq!(batch[1].leaf_index, 2);
        assert_eq!(batch[1].log_index, 1);
        assert_eq!(chain.head().await, 2);
    }

    #[tokio::test]
    async fn test_fetch_filters_by_range() {
        let chain = MockChainSource::new();
        chain.deposit(Commitment::from_u64(1)).await;
        chain.deposit(Commitment::from_u64(2)).await;
        chain.deposit(Commitment::from_u64(3)).await;
        let events = chain.fetch_events(2, 3).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.block().number >= 2));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let chain = MockChainSource::new();
        chain.fail_next_fetches(1).await;
        assert!(chain.fetch_events(0, 10).await.is_err());
        assert!(chain.fetch_events(0, 10).await.is_ok());
        assert_eq!(chain.fetch_calls().await, 2);
    }

    #[tokio::test]
    async fn test_reorg_changes_hashes_from_fork_point() {
        let chain = MockChainSource::new();
        let a = chain.deposit(Commitment::from_u64(1)).await;
        let b = chain.deposit(Commitment::from_u64(2)).await;

        let orphaned = chain.reorg(b.block.number).await;
        assert_eq!(orphaned, vec![PoolEvent::Deposit(b.clone())]);

        assert_eq!(chain.block_hash(a.block.number).await.unwrap(), Some(a.block.hash));
        assert_ne!(chain.block_hash(b.block.number).await.unwrap(), Some(b.block.hash));

        // The replacement deposit reuses the orphaned leaf index.
        let c = chain.deposit(Commitment::from_u64(3)).await;
        assert_eq!(c.leaf_index, 1);
    }

    #[tokio::test]
    async fn test_withdraw_marks_spent() {
        let chain = MockChainSource::new();
        let nf = NullifierHash(B256::repeat_byte(7));
        chain.withdraw(nf).await;
        assert!(chain.is_spent(nf).await.unwrap());
        assert_eq!(chain.spent_checks().await, 1);
    }

    #[tokio::test]
    async fn test_missing_block_hashes_are_consumed() {
        let chain = MockChainSource::new();
        let a = chain.deposit(Commitment::from_u64(1)).await;
        chain.miss_next_block_hashes(1).await;
        assert_eq!(chain.block_hash(a.block.number).await.unwrap(), None);
        assert_eq!(chain.block_hash(a.block.number).await.unwrap(), Some(a.block.hash));
    }
}
