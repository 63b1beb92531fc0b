use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Address;

/// EVM network identifier. Zero is not a valid chain id.
#[derive(Serialize, Deserialize, Hash, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChainId(u32);

impl ChainId {
    /// # Panics
    ///
    /// If `id` is `0`.
    pub fn new(id: u32) -> Self {
        assert!(id != 0);

        Self(id)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for ChainId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

/// A configured chain: where to reach it and which custody contract to tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub chain_id: ChainId,
    /// HTTP JSON-RPC endpoint of the chain.
    pub rpc: String,
    /// Address of the custody contract holding the channel deposits.
    pub custody: Address,
}
