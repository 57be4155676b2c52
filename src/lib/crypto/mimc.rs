//! Native MiMC sponge over BN254, compatible with circomlib's `MiMCSponge(2, 220, 1)`
//! and the `Hasher` contract generated from it.

use std::sync::OnceLock;

use alloy::primitives::keccak256;
use ark_bn254::Fr;
use ark_ff::{Field, PrimeField};

use crate::domain::field::FieldElement;
use crate::ports::hasher::{FieldHasher, HasherError};

pub const ROUNDS: usize = 220;

const CONSTANTS_SEED: &[u8] = b"mimcsponge";

/// `hash(l, r)` is the pool's `hashLeftRight`: absorb `l`, add `r` to the rate
/// element, permute again, squeeze the rate element.
#[derive(Debug, Default)]
pub struct MimcSpongeHasher {
    constants: OnceLock<Vec<Fr>>,
}

impl MimcSpongeHasher {
    pub const NAME: &'static str = "mimc";

    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize in one step.
    pub fn ready() -> Self {
        let hasher = Self::new();
        hasher.constants.get_or_init(round_constants);
        hasher
    }

    /// One Feistel permutation with key 0: the contract's `MiMCSponge(xL, xR)`.
    pub fn sponge(
        &self,
        xl: &FieldElement,
        xr: &FieldElement,
    ) -> Result<(FieldElement, FieldElement), HasherError> {
        let constants = self.constants()?;
        let (l, r) = feistel(constants, xl.to_fr(), xr.to_fr());
        Ok((FieldElement::from_fr(l), FieldElement::from_fr(r)))
    }

    fn constants(&self) -> Result<&[Fr], HasherError> {
        self.constants
            .get()
            .map(Vec::as_slice)
            .ok_or(HasherError::UninitializedHasher)
    }
}

impl FieldHasher for MimcSpongeHasher {
    fn initialize(&self) -> Result<(), HasherError> {
        self.constants.get_or_init(round_constants);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.constants.get().is_some()
    }

    fn hash(&self, left: &FieldElement, right: &FieldElement) -> Result<FieldElement, HasherError> {
        let constants = self.constants()?;
        let (r, c) = feistel(constants, left.to_fr(), Fr::from(0u64));
        let (r, _) = feistel(constants, r + right.to_fr(), c);
        Ok(FieldElement::from_fr(r))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Round constants: a keccak chain over the seed, each link reduced into the field.
/// The first and last rounds use zero.
fn round_constants() -> Vec<Fr> {
    let mut constants = Vec::with_capacity(ROUNDS);
    constants.push(Fr::from(0u64));
    let mut link = keccak256(CONSTANTS_SEED);
    for _ in 1..ROUNDS - 1 {
        link = keccak256(link);
        constants.push(Fr::from_be_bytes_mod_order(link.as_slice()));
    }
    constants.push(Fr::from(0u64));
    constants
}

fn feistel(constants: &[Fr], mut xl: Fr, mut xr: Fr) -> (Fr, Fr) {
    let last = constants.len() - 1;
    for (i, c) in constants.iter().enumerate() {
        let t = xl + c;
        let t5 = t.square().square() * t;
        if i < last {
            let next = xr + t5;
            xr = xl;
            xl = next;
        } else {
            xr += t5;
        }
    }
    (xl, xr)
}
