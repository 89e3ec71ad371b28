//! Node configuration. Every field has a default so callers can load a
//! partial JSON document.

use alloy_primitives::{Address, U256};
use evm_fork::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_CHAIN_ID: u64 = 31337;
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;
pub const DEFAULT_BASE_FEE: u64 = 1_000_000_000;
pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;
/// Intrinsic gas of a plain transfer.
pub const TX_BASE_GAS: u64 = 21_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    /// Mine a block after every accepted transaction.
    #[default]
    Auto,
    /// Mine only on explicit request.
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    pub max_txs: usize,
    pub max_txs_per_account: usize,
    pub max_tx_data_bytes: usize,
    /// Minimum fee increase, in percent, for a same-nonce replacement.
    pub price_bump_percent: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_txs: 5_000,
            max_txs_per_account: 100,
            max_tx_data_bytes: 128 * 1024,
            price_bump_percent: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForkConfig {
    pub url: String,
    /// Upstream block to fork at; `None` resolves `latest` once at startup.
    pub block_number: Option<u64>,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            block_number: None,
            retries: 3,
            retry_backoff_ms: 100,
            request_timeout_ms: 30_000,
        }
    }
}

impl ForkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries.max(1),
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            timeout: (self.request_timeout_ms > 0)
                .then(|| Duration::from_millis(self.request_timeout_ms)),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    pub base_fee: u64,
    pub genesis_timestamp: Option<u64>,
    pub genesis_accounts: BTreeMap<Address, U256>,
    pub mining: MiningMode,
    /// Seconds added per block when no explicit timestamp is set.
    pub block_time: Option<u64>,
    pub coinbase: Address,
    pub fork: Option<ForkConfig>,
    pub pool: PoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            base_fee: DEFAULT_BASE_FEE,
            genesis_timestamp: None,
            genesis_accounts: BTreeMap::new(),
            mining: MiningMode::Auto,
            block_time: None,
            coinbase: Address::ZERO,
            fork: None,
            pool: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"chainId": 900, "mining": "manual", "pool": {"maxTxs": 10}}"#)
                .expect("config");
        assert_eq!(config.chain_id, 900);
        assert_eq!(config.mining, MiningMode::Manual);
        assert_eq!(config.pool.max_txs, 10);
        assert_eq!(config.pool.price_bump_percent, 10);
        assert_eq!(config.block_gas_limit, DEFAULT_BLOCK_GAS_LIMIT);
    }
}
