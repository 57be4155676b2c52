use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};

use crate::{
    adapters::abi::{IHasher, IPrivacyPool},
    domain::{
        commitment::Commitment,
        events::{BlockRef, DepositEvent, PoolEvent, WithdrawalEvent},
        field::{FieldElement, FIELD_MODULUS},
        nullifier::NullifierHash,
    },
    ports::chain::{ChainError, ChainSource},
};

/// JSON-RPC adapter for one pool contract (and optionally its hasher contract).
#[derive(Clone)]
pub struct EthereumPoolSource {
    provider: DynProvider,
    pool: Address,
    hasher: Option<Address>,
}

impl EthereumPoolSource {
    pub fn new(rpc_url: &str, pool: Address, hasher: Option<Address>) -> Result<Self, ChainError> {
        let provider = DynProvider::new(
            ProviderBuilder::new().connect_http(
                rpc_url
                    .parse()
                    .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL: {}", e)))?,
            ),
        );

        Ok(Self {
            provider,
            pool,
            hasher,
        })
    }

    pub fn pool(&self) -> Address {
        self.pool
    }

    fn filter(&self, signature: B256, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(self.pool)
            .event_signature(signature)
            .from_block(from_block)
            .to_block(to_block)
    }
}

/// Block and position of a mined log; pending logs are rejected.
fn log_position(log: &Log) -> Result<(BlockRef, u64), ChainError> {
    let number = log
        .block_number
        .ok_or_else(|| ChainError::InvalidEvent("log without block number".into()))?;
    let hash = log.block_hash.ok_or_else(|| {
        ChainError::InvalidEvent(format!("log in block {number} without block hash"))
    })?;
    let log_index = log.log_index.ok_or_else(|| {
        ChainError::InvalidEvent(format!("log in block {number} without log index"))
    })?;
    Ok((BlockRef { number, hash }, log_index))
}

fn to_u64(value: U256, what: &str) -> Result<u64, ChainError> {
    u64::try_from(value)
        .map_err(|_| ChainError::InvalidEvent(format!("{what} {value} overflows u64")))
}

fn decode_deposit(log: &Log) -> Result<PoolEvent, ChainError> {
    let (block, log_index) = log_position(log)?;
    let event = log
        .log_decode::<IPrivacyPool::Deposit>()
        .map_err(|e| ChainError::InvalidEvent(format!("Deposit decode: {e}")))?;
    let commitment = Commitment::from_b256(event.inner.commitment)
        .map_err(|e| ChainError::InvalidEvent(format!("Deposit commitment: {e}")))?;

    Ok(PoolEvent::Deposit(DepositEvent {
        commitment,
        leaf_index: to_u64(event.inner.leafIndex, "leafIndex")?,
        timestamp: to_u64(event.inner.timestamp, "timestamp")?,
        block,
        log_index,
    }))
}

fn decode_withdrawal(log: &Log) -> Result<PoolEvent, ChainError> {
    let (block, log_index) = log_position(log)?;
    let event = log
        .log_decode::<IPrivacyPool::Withdrawal>()
        .map_err(|e| ChainError::InvalidEvent(format!("Withdrawal decode: {e}")))?;

    Ok(PoolEvent::Withdrawal(WithdrawalEvent {
        nullifier_hash: NullifierHash(event.inner.nullifierHash),
        recipient: event.inner.recipient,
        relayer: event.inner.relayer,
        fee: event.inner.fee,
        block,
        log_index,
    }))
}

impl ChainSource for EthereumPoolSource {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, ChainError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(block.map(|b| b.header.hash))
    }

    async fn fetch_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PoolEvent>, ChainError> {
        let deposit_filter =
            self.filter(IPrivacyPool::Deposit::SIGNATURE_HASH, from_block, to_block);
        let withdrawal_filter =
            self.filter(IPrivacyPool::Withdrawal::SIGNATURE_HASH, from_block, to_block);

        let (deposit_logs, withdrawal_logs) = tokio::try_join!(
            async {
                self.provider
                    .get_logs(&deposit_filter)
                    .await
                    .map_err(|e| ChainError::Rpc(format!("Deposit query: {e}")))
            },
            async {
                self.provider
                    .get_logs(&withdrawal_filter)
                    .await
                    .map_err(|e| ChainError::Rpc(format!("Withdrawal query: {e}")))
            },
        )?;

        let mut events = Vec::with_capacity(deposit_logs.len() + withdrawal_logs.len());
        for log in &deposit_logs {
            events.push(decode_deposit(log)?);
        }
        for log in &withdrawal_logs {
            events.push(decode_withdrawal(log)?);
        }
        Ok(events)
    }

    async fn is_known_root(&self, root: FieldElement) -> Result<bool, ChainError> {
        let pool = IPrivacyPool::new(self.pool, &self.provider);
        pool.isKnownRoot(root.as_b256())
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn is_spent(&self, nullifier: NullifierHash) -> Result<bool, ChainError> {
        let pool = IPrivacyPool::new(self.pool, &self.provider);
        pool.isSpent(nullifier.0)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn hash_left_right(
        &self,
        left: FieldElement,
        right: FieldElement,
    ) -> Result<Option<FieldElement>, ChainError> {
        let Some(address) = self.hasher else {
            return Ok(None);
        };
        let hasher = IHasher::new(address, &self.provider);

        // Same composition as the pool's `hashLeftRight`.
        let first = hasher
            .MiMCSponge(left.to_u256(), U256::ZERO)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let absorbed = first.xL.add_mod(right.to_u256(), FIELD_MODULUS);
        let second = hasher
            .MiMCSponge(absorbed, first.xR)
            .call()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        FieldElement::from_b256(B256::from(second.xL))
            .map(Some)
            .map_err(|e| ChainError::Rpc(format!("hasher contract returned {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;

    fn rpc_log(data: LogData, block_number: Option<u64>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x42),
                data,
            },
            block_hash: Some(B256::repeat_byte(0xbb)),
            block_number,
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_decodes_deposit_log() {
        let event = IPrivacyPool::Deposit {
            commitment: B256::with_last_byte(5),
            leafIndex: U256::from(7),
            timestamp: U256::from(1_700_000_000u64),
        };
        let decoded = decode_deposit(&rpc_log(event.encode_log_data(), Some(12))).unwrap();
        let PoolEvent::Deposit(deposit) = decoded else {
            panic!("expected a deposit");
        };
        assert_eq!(deposit.commitment, Commitment::from_u64(5));
        assert_eq!(deposit.leaf_index, 7);
        assert_eq!(deposit.block.number, 12);
        assert_eq!(deposit.block.hash, B256::repeat_byte(0xbb));
        assert_eq!(deposit.log_index, 3);
    }

    #[test]
    fn test_rejects_out_of_field_commitment() {
        let event = IPrivacyPool::Deposit {
            commitment: B256::repeat_byte(0xff),
            leafIndex: U256::ZERO,
            timestamp: U256::ZERO,
        };
        assert!(matches!(
            decode_deposit(&rpc_log(event.encode_log_data(), Some(1))),
            Err(ChainError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_rejects_pending_log() {
        let event = IPrivacyPool::Withdrawal {
            recipient: Address::repeat_byte(1),
            nullifierHash: B256::repeat_byte(2),
            relayer: Address::repeat_byte(3),
            fee: U256::from(10),
        };
        assert!(matches!(
            decode_withdrawal(&rpc_log(event.encode_log_data(), None)),
            Err(ChainError::InvalidEvent(_))
        ));

        let decoded = decode_withdrawal(&rpc_log(event.encode_log_data(), Some(4))).unwrap();
        let PoolEvent::Withdrawal(withdrawal) = decoded else {
            panic!("expected a withdrawal");
        };
        assert_eq!(withdrawal.nullifier_hash, NullifierHash(B256::repeat_byte(2)));
        assert_eq!(withdrawal.relayer, Address::repeat_byte(3));
        assert_eq!(withdrawal.fee, U256::from(10));
    }

    #[test]
    fn test_invalid_rpc_url_is_rejected() {
        assert!(EthereumPoolSource::new("not a url", Address::ZERO, None).is_err());
    }
}
