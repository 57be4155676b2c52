use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;

use crate::ports::store::{CheckpointStore, PoolCheckpoint, StoreError};

/// Stores each pool's checkpoint as `<dir>/<pool address>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a crash
/// mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, pool: Address) -> PathBuf {
        self.dir.join(format!("{pool:#x}.json"))
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, pool: Address) -> Result<Option<PoolCheckpoint>, StoreError> {
        let bytes = match tokio::fs::read(self.path_for(pool)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn save(&self, checkpoint: &PoolCheckpoint) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(checkpoint.pool);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}
