//! Plain data carried through the engine: accounts, logs, receipts and blocks.

use alloy_consensus::Header;
use alloy_primitives::{Address, Bloom, Bytes, B256, U256};
use evm_tx::SignedTx;
use serde::{Deserialize, Serialize};

/// keccak256 of empty input.
pub const KECCAK_EMPTY: B256 = alloy_primitives::KECCAK256_EMPTY;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: B256,
}

impl AccountState {
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self {
            nonce,
            balance,
            code_hash: KECCAK_EMPTY,
        }
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != KECCAK_EMPTY && self.code_hash != B256::ZERO
    }

    /// EIP-161 emptiness.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && !self.has_code()
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new(0, U256::ZERO)
    }
}

/// A state entry the fork cache may not hold yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Account(Address),
    Storage(Address, B256),
    BlockHash(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub tx_index: u64,
    pub tx_type: u8,
    pub block_number: u64,
    pub block_hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub status: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<LogEntry>,
    pub logs_bloom: Bloom,
    /// Index of this receipt's first log within the block.
    pub first_log_index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub hash: B256,
    pub transactions: Vec<SignedTx>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<SignedTx>) -> Self {
        let hash = header.hash_slow();
        Self {
            header,
            hash,
            transactions,
        }
    }

    /// A block whose hash is known from elsewhere, e.g. an upstream node.
    pub fn with_hash(header: Header, hash: B256) -> Self {
        Self {
            header,
            hash,
            transactions: Vec::new(),
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn tx_hashes(&self) -> Vec<B256> {
        self.transactions.iter().map(SignedTx::hash).collect()
    }
}
