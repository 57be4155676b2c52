use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use alloy::primitives::Address;
use serde::Deserialize;

use crate::crypto::HasherKind;
use crate::domain::field::FieldElement;
use crate::domain::merkle::MAX_TREE_DEPTH;
use crate::domain::root_history::DEFAULT_ROOT_HISTORY_SIZE;
use crate::pool::PoolParams;
use crate::sync::SyncSettings;

/// Top-level indexer configuration loaded from TOML.
#[derive(Debug, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub store: StoreConfig,
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Where checkpoints are written (one JSON file per pool).
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

/// One deployed pool contract.
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub address: Address,
    pub rpc_url: String,
    /// Block the pool contract was deployed in; backfill starts here.
    #[serde(default)]
    pub deployment_block: u64,
    pub depth: u32,
    /// `zeroValues[0] = keccak256(zero_seed) mod r`. Mutually exclusive with `zero_value`.
    pub zero_seed: Option<String>,
    /// Explicit `zeroValues[0]` as a 0x-hex field element.
    pub zero_value: Option<FieldElement>,
    #[serde(default = "default_root_history_size")]
    pub root_history_size: usize,
    #[serde(default)]
    pub hasher: HasherKind,
    /// Deployed MiMC hasher contract, checked against the native backend at startup.
    pub hasher_address: Option<Address>,
}

fn default_root_history_size() -> usize {
    DEFAULT_ROOT_HISTORY_SIZE
}

impl PoolConfig {
    /// The empty-leaf value. Only valid after `validate()`.
    pub fn zero_leaf(&self) -> Result<FieldElement, ConfigError> {
        match (&self.zero_seed, &self.zero_value) {
            (Some(seed), None) => Ok(FieldElement::from_seed(seed)),
            (None, Some(value)) => Ok(*value),
            _ => Err(ConfigError::Validation(format!(
                "pool {}: exactly one of zero_seed and zero_value is required",
                self.address
            ))),
        }
    }

    pub fn params(&self) -> Result<PoolParams, ConfigError> {
        Ok(PoolParams {
            address: self.address,
            depth: self.depth,
            zero_value: self.zero_leaf()?,
            root_history_size: self.root_history_size,
            deployment_block: self.deployment_block,
            hasher: self.hasher,
        })
    }
}

/// Errors from config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl IndexerConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.is_empty() {
            return Err(ConfigError::Validation("at least one [[pools]] entry is required".into()));
        }
        if self.sync.batch_size == 0 {
            return Err(ConfigError::Validation("sync.batch_size must be positive".into()));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "sync.retry.max_attempts must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            if !seen.insert(pool.address) {
                return Err(ConfigError::Validation(format!(
                    "pool {} configured twice",
                    pool.address
                )));
            }
            Self::validate_pool(pool)?;
        }
        Ok(())
    }

    fn validate_pool(pool: &PoolConfig) -> Result<(), ConfigError> {
        let name = pool.address;
        if !(1..=MAX_TREE_DEPTH).contains(&pool.depth) {
            return Err(ConfigError::Validation(format!(
                "pool {name}: depth {} outside 1..={MAX_TREE_DEPTH}",
                pool.depth
            )));
        }
        // There is no default zero value: a wrong one silently breaks every proof.
        pool.zero_leaf()?;
        if pool.root_history_size == 0 {
            return Err(ConfigError::Validation(format!(
                "pool {name}: root_history_size must be positive"
            )));
        }
        if pool.rpc_url.trim().is_empty() {
            return Err(ConfigError::Validation(format!("pool {name}: rpc_url is empty")));
        }
        if pool.hasher_address.is_some() && pool.hasher != HasherKind::Mimc {
            return Err(ConfigError::Validation(format!(
                "pool {name}: hasher_address is only supported with the mimc hasher"
            )));
        }
        Ok(())
    }
}
