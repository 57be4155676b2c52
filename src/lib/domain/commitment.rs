use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};

use super::field::{FieldElement, FieldError};

/// A commitment is the on-chain representation of a shielded note.
///
/// The indexer never looks inside it: only its value and the leaf index the pool
/// contract assigned to it matter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Commitment(pub FieldElement);

impl Commitment {
    /// Commitments emitted by the pool are already reduced (the contract rejects
    /// anything `>= FIELD_SIZE`), so an out-of-field value means a malformed log.
    pub fn from_b256(value: B256) -> Result<Self, FieldError> {
        FieldElement::from_b256(value).map(Self)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(FieldElement::from_u64(value))
    }

    pub fn as_field(&self) -> FieldElement {
        self.0
    }
}

impl From<FieldElement> for Commitment {
    fn from(value: FieldElement) -> Self {
        Self(value)
    }
}

impl From<Commitment> for FieldElement {
    fn from(value: Commitment) -> Self {
        value.0
    }
}

impl FromStr for Commitment {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.0)
    }
}
