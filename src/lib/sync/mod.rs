//! Event reconciliation: replays pool logs into the local tree and nullifier set.
//!
//! One `SyncEngine` per pool is the only writer of that pool's state. It backfills
//! confirmed blocks in chunks, applies events one at a time in chain order, buffers
//! deposits until their leaf index is next, and then keeps polling for new blocks.

pub mod reorder;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use serde::Deserialize;
use tokio::sync::watch;

use crate::domain::commitment::Commitment;
use crate::domain::events::{sort_events, BlockRef, DepositEvent, PoolEvent, WithdrawalEvent};
use crate::domain::field::FieldElement;
use crate::domain::merkle::TreeError;
use crate::domain::nullifier::{NullifierError, NullifierHash};
use crate::pool::{Pool, PoolHealth, PoolState, SyncPhase};
use crate::ports::chain::{ChainError, ChainSource};
use crate::ports::store::{CheckpointStore, PoolCheckpoint, StoreError};

use self::reorder::{Buffered, ReorderBuffer};
use self::retry::{retry, RetryPolicy, Transient};

/// A third gap in a row halts the pool instead of rewinding again.
pub const MAX_CONSECUTIVE_GAPS: u32 = 3;

/// How many recently applied blocks keep their hash for reorg checks.
const TRACKED_BLOCKS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Blocks newer than `head - confirmations` are not fetched.
    pub confirmations: u64,
    /// Blocks per `fetch_events` call.
    pub batch_size: u64,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Checkpoint after this many newly synced blocks.
    pub checkpoint_interval: u64,
    /// Deposits that may wait for an earlier leaf before it counts as a gap.
    pub reorder_window: usize,
    /// Ask the contract whether each new local root is known.
    pub verify_root_on_chain: bool,
    /// Ask the contract to confirm nullifiers spent while live, and suspected double spends.
    pub verify_nullifiers_on_chain: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            confirmations: 12,
            batch_size: 1_000,
            poll_interval: Duration::from_secs(12),
            checkpoint_interval: 500,
            reorder_window: 64,
            verify_root_on_chain: true,
            verify_nullifiers_on_chain: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// What one sync call applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub deposits: u64,
    pub withdrawals: u64,
    /// Events that were already applied (redelivery or replay).
    pub duplicates: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("leaf index gap: expected leaf {expected}, next buffered deposit is leaf {found}")]
    SyncGapDetected { expected: u64, found: u64 },

    #[error("chain reorg suspected at block {block}: applied {recorded}, canonical {canonical}")]
    ChainReorgSuspected {
        block: u64,
        recorded: B256,
        canonical: B256,
    },

    #[error("leaf {leaf_index} conflict: chain has {incoming}, indexer has {existing:?}")]
    LeafConflict {
        leaf_index: u64,
        existing: Option<Commitment>,
        incoming: Commitment,
    },

    #[error("checkpoint rejected: {0}")]
    CheckpointMismatch(String),

    #[error("native hash {native} differs from hasher contract {contract}")]
    HasherMismatch {
        native: FieldElement,
        contract: FieldElement,
    },

    #[error("sync cancelled")]
    Cancelled,
}

impl Transient for ChainError {
    fn is_transient(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::BlockNotFound(_))
    }
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

impl Transient for SyncError {
    fn is_transient(&self) -> bool {
        match self {
            SyncError::Chain(e) => e.is_transient(),
            SyncError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Single writer for one pool.
pub struct SyncEngine<C: ChainSource, S: CheckpointStore> {
    pool: Arc<Pool>,
    chain: Arc<C>,
    store: Arc<S>,
    settings: SyncSettings,
    shutdown: Option<watch::Receiver<bool>>,
    buffer: ReorderBuffer,
    /// Hash of every recent block that contributed an applied event.
    applied_blocks: BTreeMap<u64, B256>,
    /// Highest block ever fully synced; withdrawals at or below it may be replays.
    replay_ceiling: u64,
    last_checkpoint_block: u64,
    consecutive_gaps: u32,
    last_checked_root: Option<FieldElement>,
}

impl<C: ChainSource, S: CheckpointStore> SyncEngine<C, S> {
    pub fn new(pool: Arc<Pool>, chain: Arc<C>, store: Arc<S>, settings: SyncSettings) -> Self {
        Self {
            pool,
            chain,
            store,
            settings,
            shutdown: None,
            buffer: ReorderBuffer::new(),
            applied_blocks: BTreeMap::new(),
            replay_ceiling: 0,
            last_checkpoint_block: 0,
            consecutive_gaps: 0,
            last_checked_root: None,
        }
    }

    /// Stop at the next event or chunk boundary once the channel carries `true`
    /// (or its sender is dropped).
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Deposits waiting for an earlier leaf index.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn address(&self) -> Address {
        self.pool.address()
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `duration`; returns `true` if shutdown was requested meanwhile.
    async fn pause(&mut self, duration: Duration) -> bool {
        let Some(rx) = self.shutdown.as_mut() else {
            tokio::time::sleep(duration).await;
            return false;
        };
        if *rx.borrow() {
            return true;
        }
        let changed = tokio::select! {
            _ = tokio::time::sleep(duration) => return false,
            changed = rx.changed() => changed,
        };
        changed.is_err() || *rx.borrow()
    }

    // ── Lifecycle ──

    /// Verify the hasher, restore the checkpoint, then follow the chain until shutdown.
    ///
    /// Transient failures degrade the pool and are retried; gaps rewind and reorgs
    /// rebuild. Anything else halts this pool (other pools are unaffected) and is
    /// returned.
    pub async fn run(mut self) -> Result<(), SyncError> {
        let address = self.address();
        let result = self.drive().await;
        match &result {
            Ok(()) => tracing::info!(pool = %address, "sync engine stopped"),
            Err(e) => {
                tracing::error!(pool = %address, "sync halted: {e}");
                self.pool.set_health(PoolHealth::Halted(e.to_string())).await;
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<(), SyncError> {
        while let Err(e) = self.verify_hasher().await {
            self.recover(e).await?;
            if self.is_cancelled() {
                return Ok(());
            }
        }
        while let Err(e) = self.restore().await {
            self.recover(e).await?;
            if self.is_cancelled() {
                return Ok(());
            }
        }
        loop {
            match self.watch_live().await {
                Ok(()) => return Ok(()),
                Err(e) => self.recover(e).await?,
            }
        }
    }

    async fn degrade(&mut self, error: SyncError) {
        tracing::warn!(pool = %self.address(), "pool degraded, will retry: {error}");
        self.pool.set_health(PoolHealth::Degraded(error.to_string())).await;
        let interval = self.settings.poll_interval;
        self.pause(interval).await;
    }

    /// Handle a failed pass. `Ok` means the engine may continue.
    async fn recover(&mut self, error: SyncError) -> Result<(), SyncError> {
        let address = self.address();
        match error {
            e if e.is_transient() => {
                self.degrade(e).await;
                Ok(())
            }
            SyncError::SyncGapDetected { expected, found } => {
                self.consecutive_gaps += 1;
                tracing::error!(
                    pool = %address,
                    expected,
                    found,
                    gaps = self.consecutive_gaps,
                    "leaf index gap detected"
                );
                if self.consecutive_gaps >= MAX_CONSECUTIVE_GAPS {
                    return Err(SyncError::SyncGapDetected { expected, found });
                }
                self.rewind_after_gap().await;
                Ok(())
            }
            e @ SyncError::ChainReorgSuspected { .. } => {
                tracing::error!(pool = %address, "{e}; rebuilding from deployment block");
                self.rebuild().await
            }
            e @ SyncError::LeafConflict { .. } => match self.detect_reorg().await {
                Ok(Some(reorg)) => {
                    tracing::error!(pool = %address, "{e} ({reorg}); rebuilding from deployment block");
                    self.rebuild().await
                }
                Ok(None) => Err(e),
                // The conflict comes back on the next pass and is checked again.
                Err(lookup) if lookup.is_transient() => {
                    tracing::warn!(pool = %address, "{e}; reorg check failed");
                    self.degrade(lookup).await;
                    Ok(())
                }
                Err(lookup) => Err(lookup),
            },
            e => Err(e),
        }
    }

    /// Compare the native `hash(z0, z0)` with the pool's hasher contract, if one is configured.
    pub async fn verify_hasher(&self) -> Result<(), SyncError> {
        let address = self.address();
        let zero = self.pool.params().zero_value;
        let native = self
            .pool
            .hasher()
            .hash(&zero, &zero)
            .map_err(TreeError::from)?;

        let chain = &self.chain;
        let remote = retry(&self.settings.retry, "hasher check", move || {
            chain.hash_left_right(zero, zero)
        })
        .await?;

        match remote {
            None => {
                tracing::debug!(pool = %address, "no hasher contract configured, skipping check");
                Ok(())
            }
            Some(contract) if contract == native => {
                tracing::info!(pool = %address, hasher = self.pool.hasher().name(), "native hasher matches contract");
                Ok(())
            }
            Some(contract) => {
                tracing::error!(pool = %address, %native, %contract, "native hasher disagrees with contract");
                Err(SyncError::HasherMismatch { native, contract })
            }
        }
    }

    /// Load the pool's checkpoint and rebuild the tree from it. Without a checkpoint
    /// the pool starts empty at its deployment block.
    pub async fn restore(&mut self) -> Result<(), SyncError> {
        let address = self.address();
        self.pool.set_phase(SyncPhase::Backfilling).await;

        let store = &self.store;
        let loaded =
            retry(&self.settings.retry, "checkpoint load", move || store.load(address)).await?;
        let Some(checkpoint) = loaded else {
            let from_block = self.pool.read().await.last_synced_block + 1;
            tracing::info!(pool = %address, from_block, "no checkpoint, backfilling from deployment");
            return Ok(());
        };

        let restored = self.state_from_checkpoint(&checkpoint)?;
        let leaves = restored.tree.len();
        {
            let mut state = self.pool.write().await;
            let health = state.health.clone();
            *state = restored;
            state.phase = SyncPhase::Backfilling;
            state.health = health;
        }
        self.replay_ceiling = checkpoint.last_synced_block;
        self.last_checkpoint_block = checkpoint.last_synced_block;
        tracing::info!(
            pool = %address,
            leaves,
            nullifiers = checkpoint.nullifiers.len(),
            block = checkpoint.last_synced_block,
            "restored checkpoint"
        );
        Ok(())
    }

    fn state_from_checkpoint(&self, checkpoint: &PoolCheckpoint) -> Result<PoolState, SyncError> {
        let params = self.pool.params();
        let mismatch = |what: &str, stored: String, configured: String| {
            SyncError::CheckpointMismatch(format!(
                "{what}: checkpoint has {stored}, pool has {configured}"
            ))
        };
        if checkpoint.pool != params.address {
            return Err(mismatch(
                "address",
                checkpoint.pool.to_string(),
                params.address.to_string(),
            ));
        }
        if checkpoint.depth != params.depth {
            return Err(mismatch("depth", checkpoint.depth.to_string(), params.depth.to_string()));
        }
        if checkpoint.zero_value != params.zero_value {
            return Err(mismatch(
                "zero value",
                checkpoint.zero_value.to_string(),
                params.zero_value.to_string(),
            ));
        }
        if checkpoint.hasher != params.hasher {
            return Err(mismatch(
                "hasher",
                checkpoint.hasher.to_string(),
                params.hasher.to_string(),
            ));
        }

        let mut deposits = checkpoint.deposits.clone();
        deposits.sort_by_key(|d| d.leaf_index);

        let mut state = self.pool.fresh_state()?;
        for (position, record) in deposits.into_iter().enumerate() {
            if record.leaf_index != position as u64 {
                return Err(SyncError::CheckpointMismatch(format!(
                    "deposit leaf indices are not dense at {position} (found {})",
                    record.leaf_index
                )));
            }
            state.tree.insert_commitment(&record.commitment)?;
            state.deposits.insert(record.commitment, record);
        }

        let root = state.tree.current_root()?;
        if root != checkpoint.root {
            return Err(mismatch("root", checkpoint.root.to_string(), root.to_string()));
        }
        state.nullifiers = checkpoint.nullifiers.iter().copied().collect();
        state.last_synced_block = checkpoint.last_synced_block;
        Ok(state)
    }

    /// Save the pool's current state.
    pub async fn checkpoint(&mut self) -> Result<(), SyncError> {
        let checkpoint = self.pool.checkpoint().await?;
        let store = &self.store;
        let snapshot = &checkpoint;
        retry(&self.settings.retry, "checkpoint save", move || store.save(snapshot)).await?;
        self.last_checkpoint_block = checkpoint.last_synced_block;
        tracing::debug!(
            pool = %checkpoint.pool,
            block = checkpoint.last_synced_block,
            leaves = checkpoint.deposits.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn maybe_checkpoint(&mut self, block: u64) -> Result<(), SyncError> {
        if block >= self.last_checkpoint_block.saturating_add(self.settings.checkpoint_interval) {
            self.checkpoint().await?;
        }
        Ok(())
    }

    async fn shutdown_checkpoint(&mut self) {
        let address = self.address();
        match self.checkpoint().await {
            Ok(()) => tracing::info!(pool = %address, "shutdown requested, checkpoint saved"),
            Err(e) => tracing::warn!(pool = %address, "final checkpoint failed: {e}"),
        }
    }

    // ── Backfill and live follow ──

    /// Fetch and apply every event in `from_block..=to_block`, chunk by chunk.
    ///
    /// The pool's `last_synced_block` advances only after a chunk is fully applied.
    /// Cancellation is honored between events and between chunks, never mid-insert.
    pub async fn sync_historical(
        &mut self,
        from_block: u64,
        to_block: u64,
    ) -> Result<SyncReport, SyncError> {
        let address = self.address();
        let batch = self.settings.batch_size.max(1);
        let mut report = SyncReport::default();
        let mut start = from_block;

        while start <= to_block {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let end = start.saturating_add(batch - 1).min(to_block);

            let chain = &self.chain;
            let mut events = retry(&self.settings.retry, "fetch_events", move || {
                chain.fetch_events(start, end)
            })
            .await?;
            sort_events(&mut events);
            tracing::debug!(pool = %address, from = start, to = end, events = events.len(), "fetched range");

            for event in events {
                if self.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                self.apply_event(event, &mut report).await?;
            }

            // Leaf indices follow chain order, so after a whole range nothing may wait.
            if let Some(found) = self.buffer.first_index() {
                let expected = self.pool.read().await.tree.len();
                return Err(SyncError::SyncGapDetected { expected, found });
            }

            {
                // Replaying an older range must not move the cursor back.
                let mut state = self.pool.write().await;
                state.last_synced_block = state.last_synced_block.max(end);
            }
            self.replay_ceiling = self.replay_ceiling.max(end);
            self.maybe_checkpoint(end).await?;

            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(report)
    }

    /// Poll for newly confirmed blocks until shutdown. Returns `Ok` on shutdown.
    pub async fn watch_live(&mut self) -> Result<(), SyncError> {
        let address = self.address();
        loop {
            if self.is_cancelled() {
                self.shutdown_checkpoint().await;
                return Ok(());
            }

            let chain = &self.chain;
            let head =
                retry(&self.settings.retry, "latest_block", move || chain.latest_block()).await?;
            let safe_head = head.saturating_sub(self.settings.confirmations);
            let last = self.pool.read().await.last_synced_block;

            if safe_head > last {
                match self.sync_historical(last + 1, safe_head).await {
                    Ok(report) if report.deposits + report.withdrawals > 0 => {
                        tracing::info!(
                            pool = %address,
                            to_block = safe_head,
                            deposits = report.deposits,
                            withdrawals = report.withdrawals,
                            "synced"
                        );
                    }
                    Ok(_) => {}
                    Err(SyncError::Cancelled) => {
                        self.shutdown_checkpoint().await;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            self.consecutive_gaps = 0;

            self.check_canonical().await?;
            if self.mark_live().await {
                self.checkpoint().await?;
            }
            self.cross_check_root().await;

            let interval = self.settings.poll_interval;
            if self.pause(interval).await {
                self.shutdown_checkpoint().await;
                return Ok(());
            }
        }
    }

    /// Apply one pushed event, e.g. from a log subscription. Deposits may arrive out
    /// of order as long as no more than `reorder_window` wait at once. The backfill
    /// cursor is not moved.
    pub async fn ingest(&mut self, event: PoolEvent) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        self.apply_event(event, &mut report).await?;
        Ok(report)
    }

    // ── Applying events ──

    async fn apply_event(
        &mut self,
        event: PoolEvent,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        self.check_block(event.block())?;
        match event {
            PoolEvent::Deposit(deposit) => self.apply_deposit(deposit, report).await,
            PoolEvent::Withdrawal(withdrawal) => {
                self.apply_withdrawal(&withdrawal, report).await;
                Ok(())
            }
        }
    }

    async fn apply_withdrawal(&mut self, withdrawal: &WithdrawalEvent, report: &mut SyncReport) {
        let address = self.address();
        let result = self
            .pool
            .write()
            .await
            .nullifiers
            .mark_spent(withdrawal.nullifier_hash);

        match result {
            Ok(()) => {
                report.withdrawals += 1;
                self.record_block(withdrawal.block);
                tracing::debug!(pool = %address, nullifier = %withdrawal.nullifier_hash, "nullifier spent");
                if self.pool.read().await.phase == SyncPhase::Live {
                    self.confirm_spent(withdrawal.nullifier_hash).await;
                }
            }
            Err(NullifierError::AlreadySpent(hash)) => {
                report.duplicates += 1;
                let block = withdrawal.block;
                let replayed = block.number <= self.replay_ceiling
                    || self.applied_blocks.get(&block.number) == Some(&block.hash);
                if replayed {
                    tracing::debug!(pool = %address, nullifier = %hash, "duplicate withdrawal delivery ignored");
                } else {
                    tracing::error!(
                        pool = %address,
                        nullifier = %hash,
                        block = withdrawal.block.number,
                        "nullifier spent twice on-chain, possible double spend"
                    );
                    self.confirm_spent(hash).await;
                }
            }
        }
    }

    async fn apply_deposit(
        &mut self,
        deposit: DepositEvent,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let address = self.address();
        let leaf_index = deposit.leaf_index;
        let incoming = deposit.commitment;

        {
            let state = self.pool.read().await;
            let occupant = |index: u64| {
                state
                    .tree
                    .tree()
                    .leaves()
                    .get(index as usize)
                    .map(|leaf| Commitment(*leaf))
            };
            if let Some(existing) = state.tree.leaf_index(&incoming) {
                if existing == leaf_index {
                    report.duplicates += 1;
                    tracing::debug!(pool = %address, leaf_index, "duplicate deposit ignored");
                    return Ok(());
                }
                return Err(SyncError::LeafConflict {
                    leaf_index,
                    existing: occupant(leaf_index),
                    incoming,
                });
            }
            if leaf_index < state.tree.len() {
                return Err(SyncError::LeafConflict {
                    leaf_index,
                    existing: occupant(leaf_index),
                    incoming,
                });
            }
        }

        match self.buffer.insert(deposit) {
            Buffered::Added => {}
            Buffered::Duplicate => {
                report.duplicates += 1;
                return Ok(());
            }
            Buffered::Conflict(existing) => {
                return Err(SyncError::LeafConflict {
                    leaf_index,
                    existing: Some(existing.commitment),
                    incoming,
                });
            }
        }

        self.drain_buffer(report).await?;

        if self.buffer.len() > self.settings.reorder_window {
            let expected = self.pool.read().await.tree.len();
            let found = self.buffer.first_index().unwrap_or(leaf_index);
            return Err(SyncError::SyncGapDetected { expected, found });
        }
        Ok(())
    }

    /// Insert buffered deposits while the next leaf index is available, taking the
    /// write lock once per insert.
    async fn drain_buffer(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        let address = self.address();
        loop {
            let mut state = self.pool.write().await;
            let next = state.tree.len();
            let Some(deposit) = self.buffer.pop_next(next) else {
                return Ok(());
            };
            state.apply_deposit(&deposit)?;
            drop(state);

            self.record_block(deposit.block);
            report.deposits += 1;
            tracing::debug!(
                pool = %address,
                leaf_index = deposit.leaf_index,
                commitment = %deposit.commitment,
                block = deposit.block.number,
                "deposit inserted"
            );
        }
    }

    // ── Reorg detection ──

    fn check_block(&self, block: BlockRef) -> Result<(), SyncError> {
        match self.applied_blocks.get(&block.number) {
            Some(recorded) if *recorded != block.hash => Err(SyncError::ChainReorgSuspected {
                block: block.number,
                recorded: *recorded,
                canonical: block.hash,
            }),
            _ => Ok(()),
        }
    }

    fn record_block(&mut self, block: BlockRef) {
        self.applied_blocks.insert(block.number, block.hash);
        while self.applied_blocks.len() > TRACKED_BLOCKS {
            self.applied_blocks.pop_first();
        }
    }

    /// Is the newest applied block still canonical?
    async fn check_canonical(&self) -> Result<(), SyncError> {
        let Some((&number, &recorded)) = self.applied_blocks.last_key_value() else {
            return Ok(());
        };
        let canonical = self.canonical_hash(number).await?;
        if canonical != recorded {
            return Err(SyncError::ChainReorgSuspected {
                block: number,
                recorded,
                canonical,
            });
        }
        Ok(())
    }

    /// Check every tracked block, newest first; returns the first mismatch found.
    async fn detect_reorg(&self) -> Result<Option<SyncError>, SyncError> {
        for (&number, &recorded) in self.applied_blocks.iter().rev() {
            let canonical = self.canonical_hash(number).await?;
            if canonical != recorded {
                return Ok(Some(SyncError::ChainReorgSuspected {
                    block: number,
                    recorded,
                    canonical,
                }));
            }
        }
        Ok(None)
    }

    /// Hash of block `number` on the node's canonical chain. A node that doesn't
    /// know the block (lagging or behind a load balancer) yields `BlockNotFound`,
    /// which is retried like any RPC failure instead of counting as a mismatch.
    async fn canonical_hash(&self, number: u64) -> Result<B256, SyncError> {
        let chain = &self.chain;
        let hash = retry(&self.settings.retry, "block_hash", move || async move {
            chain
                .block_hash(number)
                .await?
                .ok_or(ChainError::BlockNotFound(number))
        })
        .await?;
        Ok(hash)
    }

    /// Throw away all state and re-derive it from the deployment block.
    async fn rebuild(&mut self) -> Result<(), SyncError> {
        let fresh = self.pool.fresh_state()?;
        {
            let mut state = self.pool.write().await;
            let health = state.health.clone();
            *state = fresh;
            state.phase = SyncPhase::Backfilling;
            state.health = health;
        }
        self.buffer.clear();
        self.applied_blocks.clear();
        self.consecutive_gaps = 0;
        self.last_checked_root = None;
        // Overwrite the checkpoint so a restart can't resurrect orphaned leaves.
        self.checkpoint().await
    }

    /// Drop buffered deposits and re-fetch from the block of the last applied deposit.
    async fn rewind_after_gap(&mut self) {
        self.buffer.clear();
        let deployment_block = self.pool.params().deployment_block;
        let mut state = self.pool.write().await;
        let resume = match state.last_deposit_block() {
            Some(block) => block.saturating_sub(1),
            None => deployment_block.saturating_sub(1),
        };
        state.last_synced_block = state.last_synced_block.min(resume);
        state.phase = SyncPhase::Backfilling;
        tracing::info!(
            pool = %self.pool.address(),
            from_block = state.last_synced_block + 1,
            "rewinding to refetch missing deposits"
        );
    }

    // ── Live bookkeeping ──

    /// Mark the pool live and healthy; `true` on the transition into `Live`.
    async fn mark_live(&self) -> bool {
        let mut state = self.pool.write().await;
        state.health = PoolHealth::Healthy;
        if state.phase == SyncPhase::Live {
            return false;
        }
        state.phase = SyncPhase::Live;
        tracing::info!(
            pool = %self.pool.address(),
            leaves = state.tree.len(),
            block = state.last_synced_block,
            "caught up, following chain head"
        );
        true
    }

    /// Ask the contract whether a nullifier the local set holds as spent is spent
    /// on-chain. `None` when the check is disabled or the call failed.
    async fn confirm_spent(&self, nullifier: NullifierHash) -> Option<bool> {
        if !self.settings.verify_nullifiers_on_chain {
            return None;
        }
        let address = self.address();
        match self.chain.is_spent(nullifier).await {
            Ok(true) => {
                tracing::debug!(pool = %address, %nullifier, "nullifier confirmed spent on-chain");
                Some(true)
            }
            Ok(false) => {
                tracing::warn!(pool = %address, %nullifier, "nullifier spent locally but not on the contract");
                Some(false)
            }
            Err(e) => {
                tracing::warn!(pool = %address, %nullifier, "nullifier cross-check failed: {e}");
                None
            }
        }
    }

    /// Ask the contract about a new local root. A miss is only a warning: with
    /// confirmation lag the local root can legitimately be older than the window.
    async fn cross_check_root(&mut self) {
        if !self.settings.verify_root_on_chain {
            return;
        }
        let address = self.address();
        let Ok(snapshot) = self.pool.latest_root().await else {
            return;
        };
        if self.last_checked_root == Some(snapshot.root) {
            return;
        }
        match self.chain.is_known_root(snapshot.root).await {
            Ok(true) => {
                tracing::debug!(pool = %address, root = %snapshot.root, "root confirmed on-chain");
                self.last_checked_root = Some(snapshot.root);
            }
            Ok(false) => {
                tracing::warn!(pool = %address, root = %snapshot.root, "local root not known to the contract");
                self.last_checked_root = Some(snapshot.root);
            }
            Err(e) => tracing::warn!(pool = %address, "root cross-check failed: {e}"),
        }
    }
}
