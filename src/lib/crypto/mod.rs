pub mod mimc;
pub mod poseidon;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ports::hasher::FieldHasher;

pub use self::mimc::MimcSpongeHasher;
pub use self::poseidon::PoseidonHasher;

/// Hash backend a pool's tree is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    #[default]
    Mimc,
    Poseidon,
}

impl HasherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HasherKind::Mimc => MimcSpongeHasher::NAME,
            HasherKind::Poseidon => PoseidonHasher::NAME,
        }
    }
}

impl fmt::Display for HasherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build an uninitialized hasher of the given kind.
pub fn build_hasher(kind: HasherKind) -> Arc<dyn FieldHasher> {
    match kind {
        HasherKind::Mimc => Arc::new(MimcSpongeHasher::new()),
        HasherKind::Poseidon => Arc::new(PoseidonHasher::new()),
    }
}
