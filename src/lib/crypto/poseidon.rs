use std::sync::atomic::{AtomicBool, Ordering};

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher as _};

use crate::domain::field::FieldElement;
use crate::ports::hasher::{FieldHasher, HasherError};

/// Circom-compatible Poseidon with two inputs (matches Solidity's `PoseidonT3`).
#[derive(Debug, Default)]
pub struct PoseidonHasher {
    ready: AtomicBool,
}

impl PoseidonHasher {
    pub const NAME: &'static str = "poseidon";

    pub fn new() -> Self {
        Self::default()
    }

    fn instance() -> Result<Poseidon<Fr>, HasherError> {
        Poseidon::<Fr>::new_circom(2).map_err(|e| HasherError::Backend(e.to_string()))
    }
}

impl FieldHasher for PoseidonHasher {
    fn initialize(&self) -> Result<(), HasherError> {
        Self::instance()?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn hash(&self, left: &FieldElement, right: &FieldElement) -> Result<FieldElement, HasherError> {
        if !self.is_ready() {
            return Err(HasherError::UninitializedHasher);
        }
        let result = Self::instance()?
            .hash(&[left.to_fr(), right.to_fr()])
            .map_err(|e| HasherError::Backend(e.to_string()))?;
        Ok(FieldElement::from_fr(result))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
