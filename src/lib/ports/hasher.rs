use std::fmt::Debug;

use crate::domain::field::FieldElement;

/// Port for the two-to-one hash the pool contract builds its tree with.
///
/// Implementations must be bit-compatible with the deployed hasher contract.
/// `initialize` loads whatever the backend needs (round constants, parameters) and
/// may be called any number of times; `hash` before it fails with
/// [`HasherError::UninitializedHasher`].
///
/// Implementations:
/// - `MimcSpongeHasher` (Tornado-style pools)
/// - `PoseidonHasher` (circom Poseidon, t = 3)
pub trait FieldHasher: Send + Sync + Debug {
    fn initialize(&self) -> Result<(), HasherError>;

    fn is_ready(&self) -> bool;

    fn hash(&self, left: &FieldElement, right: &FieldElement) -> Result<FieldElement, HasherError>;

    /// Short backend name, recorded in checkpoints.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HasherError {
    #[error("hasher used before initialize()")]
    UninitializedHasher,

    #[error("hash backend error: {0}")]
    Backend(String),
}
