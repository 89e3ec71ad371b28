//! Upstream payload shapes.

use alloy_primitives::{Address, Bytes, B256, B64, U256, U64};
use serde::Deserialize;

/// Header fields read from `eth_getBlockByNumber`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHeader {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(default)]
    pub state_root: B256,
    pub timestamp: U64,
    pub gas_limit: U64,
    #[serde(default)]
    pub gas_used: U64,
    #[serde(default)]
    pub base_fee_per_gas: Option<U64>,
    #[serde(default)]
    pub miner: Address,
    #[serde(default)]
    pub mix_hash: B256,
    #[serde(default)]
    pub difficulty: U256,
    #[serde(default)]
    pub nonce: B64,
    #[serde(default)]
    pub extra_data: Bytes,
}

impl RemoteHeader {
    pub fn number(&self) -> u64 {
        self.number.to::<u64>()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }

    pub fn base_fee(&self) -> Option<u64> {
        self.base_fee_per_gas.map(|fee| fee.to::<u64>())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteAccount {
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
}

impl RemoteAccount {
    /// An account the upstream knows nothing about.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code.is_empty()
    }
}
