use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::Address;

use crate::pool::{Pool, PoolStatus};

/// Owns one `Pool` per contract address. Built once at startup and shared with the
/// HTTP handlers; each pool is written only by its own sync engine.
#[derive(Debug, Default, Clone)]
pub struct PoolRegistry {
    pools: BTreeMap<Address, Arc<Pool>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("pool {0} registered twice")]
    Duplicate(Address),
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pool: Arc<Pool>) -> Result<(), RegistryError> {
        let address = pool.address();
        if self.pools.contains_key(&address) {
            return Err(RegistryError::Duplicate(address));
        }
        self.pools.insert(address, pool);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<Arc<Pool>> {
        self.pools.get(address).cloned()
    }

    /// Pools in address order.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub async fn statuses(&self) -> Vec<PoolStatus> {
        let mut statuses = Vec::with_capacity(self.pools.len());
        for pool in self.pools.values() {
            statuses.push(pool.status().await);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::FieldElement;
    use crate::pool::PoolParams;

    fn pool(byte: u8) -> Arc<Pool> {
        let params = PoolParams::new(Address::repeat_byte(byte), 4, FieldElement::from_u64(0));
        Arc::new(Pool::new(params).unwrap())
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = PoolRegistry::new();
        registry.register(pool(1)).unwrap();
        registry.register(pool(2)).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&Address::repeat_byte(1)).is_some());
        assert!(registry.get(&Address::repeat_byte(3)).is_none());
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let mut registry = PoolRegistry::new();
        registry.register(pool(1)).unwrap();
        assert!(matches!(
            registry.register(pool(1)),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_statuses_in_address_order() {
        let mut registry = PoolRegistry::new();
        registry.register(pool(9)).unwrap();
        registry.register(pool(1)).unwrap();
        let statuses = registry.statuses().await;
        assert_eq!(statuses[0].address, Address::repeat_byte(1));
        assert_eq!(statuses[1].address, Address::repeat_byte(9));
    }
}
