//! Chain Store: canonical blocks, receipts and transaction lookup.

use crate::error::{ChainError, StateError};
use crate::types::{Block, StateKey, TxReceipt};
use alloy_primitives::B256;
use evm_tx::SignedTx;
use std::collections::{BTreeMap, HashMap};

/// Where a mined transaction sits in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxLocation {
    pub block_number: u64,
    pub block_hash: B256,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct ChainStore {
    /// First locally held block: genesis, or the fork block in fork mode.
    base: Block,
    /// Blocks mined on top of `base`.
    blocks: BTreeMap<u64, Block>,
    by_hash: HashMap<B256, u64>,
    receipts: HashMap<B256, TxReceipt>,
    tx_locations: HashMap<B256, TxLocation>,
    remote_hashes: BTreeMap<u64, B256>,
    forked: bool,
}

impl ChainStore {
    pub fn new(genesis: Block) -> Self {
        Self::with_base(genesis, false)
    }

    /// Chain whose base block is the upstream block it was forked at.
    pub fn forked(fork_block: Block) -> Self {
        Self::with_base(fork_block, true)
    }

    fn with_base(base: Block, forked: bool) -> Self {
        let mut by_hash = HashMap::new();
        by_hash.insert(base.hash, base.number());
        Self {
            base,
            blocks: BTreeMap::new(),
            by_hash,
            receipts: HashMap::new(),
            tx_locations: HashMap::new(),
            remote_hashes: BTreeMap::new(),
            forked,
        }
    }

    pub fn is_fork(&self) -> bool {
        self.forked
    }

    pub fn base_number(&self) -> u64 {
        self.base.number()
    }

    pub fn head(&self) -> &Block {
        self.blocks.values().next_back().unwrap_or(&self.base)
    }

    pub fn latest_number(&self) -> u64 {
        self.head().number()
    }

    pub fn block_by_number(&self, number: u64) -> Option<&Block> {
        if number == self.base.number() {
            return Some(&self.base);
        }
        self.blocks.get(&number)
    }

    pub fn block_by_hash(&self, hash: &B256) -> Option<&Block> {
        self.by_hash.get(hash).and_then(|n| self.block_by_number(*n))
    }

    /// Locally held blocks with numbers in `from..=to`.
    pub fn blocks_in_range(&self, from: u64, to: u64) -> impl Iterator<Item = &Block> {
        let base = (from <= self.base.number() && self.base.number() <= to).then_some(&self.base);
        let upper = if from > to { to..=to } else { from..=to };
        let mined = self
            .blocks
            .range(upper)
            .filter(move |(n, _)| from <= **n)
            .map(|(_, block)| block);
        base.into_iter().chain(mined)
    }

    pub fn receipt(&self, tx_hash: &B256) -> Option<&TxReceipt> {
        self.receipts.get(tx_hash)
    }

    pub fn block_receipts(&self, block: &Block) -> Vec<&TxReceipt> {
        block
            .transactions
            .iter()
            .filter_map(|tx| self.receipts.get(&tx.hash()))
            .collect()
    }

    pub fn transaction(&self, tx_hash: &B256) -> Option<(&SignedTx, TxLocation)> {
        let location = *self.tx_locations.get(tx_hash)?;
        let block = self.block_by_number(location.block_number)?;
        let tx = block.transactions.get(location.index)?;
        Some((tx, location))
    }

    pub fn contains_tx(&self, tx_hash: &B256) -> bool {
        self.tx_locations.contains_key(tx_hash)
    }

    /// Appends a sealed block on top of the head.
    pub fn append(&mut self, block: Block, receipts: Vec<TxReceipt>) -> Result<(), ChainError> {
        let head = self.head();
        let expected = head.number() + 1;
        if block.number() != expected {
            return Err(ChainError::NotContiguous {
                head: head.number(),
                got: block.number(),
            });
        }
        if block.header.parent_hash != head.hash {
            return Err(ChainError::ParentMismatch {
                number: block.number(),
            });
        }
        for (index, tx) in block.transactions.iter().enumerate() {
            self.tx_locations.insert(
                tx.hash(),
                TxLocation {
                    block_number: block.number(),
                    block_hash: block.hash,
                    index,
                },
            );
        }
        for receipt in receipts {
            self.receipts.insert(receipt.tx_hash, receipt);
        }
        self.by_hash.insert(block.hash, block.number());
        self.blocks.insert(block.number(), block);
        Ok(())
    }

    /// Removes the head block and returns it with its receipts.
    pub fn pop_head(&mut self) -> Result<(Block, Vec<TxReceipt>), ChainError> {
        let number = self.latest_number();
        if number <= self.base.number() {
            return Err(ChainError::RollbackPastBase(self.base.number()));
        }
        let block = self
            .blocks
            .remove(&number)
            .ok_or_else(|| ChainError::BlockNotFound(number.to_string()))?;
        self.by_hash.remove(&block.hash);
        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions.iter() {
            self.tx_locations.remove(&tx.hash());
            if let Some(receipt) = self.receipts.remove(&tx.hash()) {
                receipts.push(receipt);
            }
        }
        Ok((block, receipts))
    }

    /// Hash for the BLOCKHASH opcode. Pre-fork hashes come from upstream.
    pub fn block_hash(&self, number: u64) -> Result<B256, StateError> {
        if let Some(block) = self.block_by_number(number) {
            return Ok(block.hash);
        }
        if self.forked && number < self.base.number() {
            return self
                .remote_hashes
                .get(&number)
                .copied()
                .ok_or(StateError::Missing(StateKey::BlockHash(number)));
        }
        Ok(B256::ZERO)
    }

    pub fn cache_remote_hash(&mut self, number: u64, hash: B256) {
        self.remote_hashes.insert(number, hash);
    }
}
