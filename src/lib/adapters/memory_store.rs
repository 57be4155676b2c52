use alloy::primitives::Address;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::ports::store::{CheckpointStore, PoolCheckpoint, StoreError};

/// In-memory implementation of `CheckpointStore` for testing.
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<Address, PoolCheckpoint>>,
    saves: Mutex<usize>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Mutex::new(HashMap::new()),
            saves: Mutex::new(0),
        }
    }

    /// Number of `save` calls so far (for test assertions).
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }

    /// Overwrite a checkpoint directly, bypassing the engine.
    pub async fn put(&self, checkpoint: PoolCheckpoint) {
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.pool, checkpoint);
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, pool: Address) -> Result<Option<PoolCheckpoint>, StoreError> {
        Ok(self.checkpoints.lock().await.get(&pool).cloned())
    }

    async fn save(&self, checkpoint: &PoolCheckpoint) -> Result<(), StoreError> {
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.pool, checkpoint.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }
}
