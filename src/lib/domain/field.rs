use std::fmt;
use std::str::FromStr;

use alloy::primitives::{uint, B256, U256};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use serde::{Deserialize, Serialize};

/// Order of the BN254 scalar field. Every tree node and commitment lives below it.
pub const FIELD_MODULUS: U256 =
    uint!(21888242871839275222246405745257275088548364400416034343698204186575808495617_U256);

/// A canonical element of the BN254 scalar field, stored as 32 big-endian bytes.
///
/// The byte layout is the ABI encoding of a `bytes32` / `uint256`, so values can be
/// handed to the contract and the circuit without conversion.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldElement(B256);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("value has {0} hex digits, at most 64 allowed")]
    TooLong(usize),

    #[error("value {0} is not below the field modulus")]
    OutOfField(B256),
}

impl FieldElement {
    pub const ZERO: Self = Self(B256::ZERO);

    pub fn from_u64(value: u64) -> Self {
        Self(B256::from(U256::from(value)))
    }

    /// Accept a 32-byte value only if it is already reduced.
    pub fn from_b256(value: B256) -> Result<Self, FieldError> {
        if U256::from_be_bytes(value.0) >= FIELD_MODULUS {
            return Err(FieldError::OutOfField(value));
        }
        Ok(Self(value))
    }

    /// Reduce arbitrary 32 bytes into the field (used for hashed seeds).
    pub fn from_be_bytes_mod_order(bytes: &[u8; 32]) -> Self {
        let reduced = U256::from_be_bytes(*bytes).reduce_mod(FIELD_MODULUS);
        Self(B256::from(reduced))
    }

    /// `keccak256(seed) mod r`: the domain-separated zero leaf convention of the pool
    /// contracts (`uint256(keccak256("tornado")) % FIELD_SIZE`).
    pub fn from_seed(seed: &str) -> Self {
        Self::from_be_bytes_mod_order(&alloy::primitives::keccak256(seed.as_bytes()).0)
    }

    pub fn from_fr(value: Fr) -> Self {
        let bytes = value.into_bigint().to_bytes_be();
        Self(B256::from_slice(&bytes))
    }

    pub fn to_fr(&self) -> Fr {
        Fr::from_be_bytes_mod_order(self.0.as_ref())
    }

    pub fn to_u256(&self) -> U256 {
        U256::from_be_bytes(self.0 .0)
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

/// Parse hex into 32 big-endian bytes: optional `0x`/`0X` prefix, any case,
/// left-zero-padded when shorter than 64 digits.
pub fn parse_hex32(s: &str) -> Result<B256, FieldError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return Err(FieldError::InvalidHex(s.to_string()));
    }
    if digits.len() > 64 {
        return Err(FieldError::TooLong(digits.len()));
    }
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(&padded).map_err(|e| FieldError::InvalidHex(format!("{s}: {e}")))?;
    Ok(B256::from_slice(&bytes))
}

impl FromStr for FieldElement {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_b256(parse_hex32(s)?)
    }
}

impl TryFrom<String> for FieldElement {
    type Error = FieldError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldElement> for String {
    fn from(value: FieldElement) -> Self {
        value.to_string()
    }
}

impl From<FieldElement> for B256 {
    fn from(value: FieldElement) -> Self {
        value.0
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({self})")
    }
}
