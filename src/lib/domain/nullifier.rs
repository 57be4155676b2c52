use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use super::field::{parse_hex32, FieldError};

/// Spend marker published by a withdrawal.
///
/// Keyed on its canonical 32 bytes: `0xABC`, `0xabc` and `0x0abc` parse to the same value.
/// Unlike commitments it is not range-checked against the field, since the pool
/// treats it as an opaque `bytes32`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NullifierHash(pub B256);

impl NullifierHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(B256::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl From<B256> for NullifierHash {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<NullifierHash> for B256 {
    fn from(value: NullifierHash) -> Self {
        value.0
    }
}

impl FromStr for NullifierHash {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex32(s).map(Self)
    }
}

impl TryFrom<String> for NullifierHash {
    type Error = FieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NullifierHash> for String {
    fn from(value: NullifierHash) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullifierHash({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NullifierError {
    #[error("nullifier already spent: {0}")]
    AlreadySpent(NullifierHash),
}

/// Write-once set of spent nullifiers. There is no way to unmark a spend.
#[derive(Debug, Clone, Default)]
pub struct NullifierSet {
    spent: HashSet<NullifierHash>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spend. A second call for the same hash fails and leaves the set unchanged.
    pub fn mark_spent(&mut self, hash: NullifierHash) -> Result<(), NullifierError> {
        if !self.spent.insert(hash) {
            return Err(NullifierError::AlreadySpent(hash));
        }
        Ok(())
    }

    pub fn is_spent(&self, hash: &NullifierHash) -> bool {
        self.spent.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.spent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    /// Spent hashes in ascending byte order (stable checkpoint output).
    pub fn sorted(&self) -> Vec<NullifierHash> {
        let mut all: Vec<_> = self.spent.iter().copied().collect();
        all.sort();
        all
    }
}

impl FromIterator<NullifierHash> for NullifierSet {
    fn from_iter<I: IntoIterator<Item = NullifierHash>>(iter: I) -> Self {
        Self {
            spent: iter.into_iter().collect(),
        }
    }
}
