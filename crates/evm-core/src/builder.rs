//! Block Builder: runs pooled transactions into a pending block and seals it.
//!
//! The builder opens one state checkpoint on its first transaction. Sealing
//! commits it; aborting reverts it, so a failed build leaves state untouched.

use crate::error::{BuildError, PoolError};
use crate::exec::{apply_state_changes, execute, tx_env, BlockParams, ExecError, ExecOptions};
use crate::pool::TxPool;
use alloy_consensus::constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
use alloy_consensus::Header;
use alloy_primitives::{Bloom, Bytes, B256, B64, U256};
use evm_db::{trie, Block, ChainStore, CheckpointId, StateManager, TxReceipt};
use evm_tx::SignedTx;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuilderStatus {
    Idle,
    Building,
    Sealed,
    Aborted,
}

impl BuilderStatus {
    fn name(self) -> &'static str {
        match self {
            BuilderStatus::Idle => "idle",
            BuilderStatus::Building => "building",
            BuilderStatus::Sealed => "sealed",
            BuilderStatus::Aborted => "aborted",
        }
    }
}

/// Result of one included transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedTx {
    pub receipt: TxReceipt,
    pub output: Bytes,
    pub halt: Option<String>,
}

#[derive(Debug)]
pub struct BlockBuilder {
    status: BuilderStatus,
    parent_hash: B256,
    params: BlockParams,
    chain_id: u64,
    extra_data: Bytes,
    checkpoint: Option<CheckpointId>,
    transactions: Vec<SignedTx>,
    receipts: Vec<TxReceipt>,
    gas_used: u64,
    log_count: u64,
}

impl BlockBuilder {
    pub fn new(parent_hash: B256, params: BlockParams, chain_id: u64) -> Self {
        Self {
            status: BuilderStatus::Idle,
            parent_hash,
            params,
            chain_id,
            extra_data: Bytes::new(),
            checkpoint: None,
            transactions: Vec::new(),
            receipts: Vec::new(),
            gas_used: 0,
            log_count: 0,
        }
    }

    pub fn status(&self) -> BuilderStatus {
        self.status
    }

    pub fn params(&self) -> &BlockParams {
        &self.params
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn remaining_gas(&self) -> u64 {
        self.params.gas_limit.saturating_sub(self.gas_used)
    }

    pub fn transactions(&self) -> &[SignedTx] {
        &self.transactions
    }

    pub fn receipts(&self) -> &[TxReceipt] {
        &self.receipts
    }

    fn expect_open(&self) -> Result<(), BuildError> {
        match self.status {
            BuilderStatus::Idle | BuilderStatus::Building => Ok(()),
            other => Err(BuildError::WrongStatus(other.name(), "idle or building")),
        }
    }

    /// Executes `tx` on top of the block so far.
    ///
    /// Reverts and halts are included with a failed receipt. Validation
    /// errors leave state and the block unchanged. `MissingState` leaves them
    /// unchanged too; the caller fetches the key and calls again.
    pub fn add_transaction(
        &mut self,
        state: &mut StateManager,
        chain: &ChainStore,
        tx: &SignedTx,
    ) -> Result<AddedTx, BuildError> {
        self.expect_open()?;
        let remaining = self.remaining_gas();
        if tx.gas_limit() > remaining {
            return Err(BuildError::GasLimitExceeded {
                gas_limit: tx.gas_limit(),
                remaining,
            });
        }
        let effective_gas_price =
            tx.effective_gas_price(self.params.base_fee)
                .ok_or(PoolError::FeeCapTooLow {
                    max_fee: tx.max_fee_per_gas(),
                    base_fee: self.params.base_fee,
                })?;

        if self.checkpoint.is_none() {
            self.checkpoint = Some(state.checkpoint());
            self.status = BuilderStatus::Building;
        }

        let options = ExecOptions {
            impersonated: tx.is_impersonated(),
            ..ExecOptions::transact(self.chain_id)
        };
        let outcome = match execute(&*state, chain, &self.params, options, tx_env(tx)) {
            Ok(outcome) => outcome,
            Err(ExecError::Missing(key)) => return Err(BuildError::MissingState(key)),
            Err(ExecError::Invalid(err)) => return Err(BuildError::Validation(err)),
            Err(ExecError::Fatal(reason)) => return Err(self.fail(state, reason)),
        };

        let gas_used = outcome.gas_used;
        let logs = outcome.logs;
        let output = outcome.output;
        let halt = outcome.halt;
        let success = outcome.success;
        let contract_address = outcome.contract_address;
        apply_state_changes(state, outcome.state);

        self.gas_used = self.gas_used.saturating_add(gas_used);
        let receipt = TxReceipt {
            tx_hash: tx.hash(),
            tx_index: self.transactions.len() as u64,
            tx_type: tx.tx_type(),
            block_number: self.params.number,
            block_hash: B256::ZERO,
            from: tx.sender(),
            to: tx.to(),
            contract_address,
            status: success,
            gas_used,
            cumulative_gas_used: self.gas_used,
            effective_gas_price,
            logs_bloom: trie::logs_bloom(logs.iter()),
            logs,
            first_log_index: self.log_count,
        };
        self.log_count += receipt.logs.len() as u64;
        self.transactions.push(tx.clone());
        self.receipts.push(receipt.clone());
        Ok(AddedTx {
            receipt,
            output,
            halt,
        })
    }

    fn fail(&mut self, state: &mut StateManager, reason: String) -> BuildError {
        error!(block_number = self.params.number, %reason, "builder: build aborted");
        if let Err(err) = self.abort(state) {
            return err;
        }
        BuildError::Fatal(reason)
    }

    /// Discards everything the builder executed.
    pub fn abort(&mut self, state: &mut StateManager) -> Result<(), BuildError> {
        self.expect_open()?;
        self.status = BuilderStatus::Aborted;
        if let Some(checkpoint) = self.checkpoint.take() {
            state
                .revert(checkpoint)
                .map_err(|err| BuildError::Fatal(err.to_string()))?;
        }
        Ok(())
    }

    /// Commits the block's state, computes its roots, appends it to the
    /// chain and clears its transactions from the pool.
    pub fn seal(
        &mut self,
        state: &mut StateManager,
        chain: &mut ChainStore,
        pool: &mut TxPool,
    ) -> Result<Block, BuildError> {
        self.expect_open()?;
        let head = chain.head();
        if head.hash != self.parent_hash || head.number() + 1 != self.params.number {
            let reason = format!(
                "parent {} is no longer the head {}",
                self.parent_hash, head.hash
            );
            return Err(self.fail(state, reason));
        }
        // Only the builder's own checkpoint may be open, or the root below
        // could not be recorded after committing.
        let own = usize::from(self.checkpoint.is_some());
        if state.checkpoint_depth() != own {
            let reason = format!(
                "{} foreign checkpoints open over the build",
                state.checkpoint_depth().saturating_sub(own)
            );
            return Err(self.fail(state, reason));
        }
        if let Some(checkpoint) = self.checkpoint.take() {
            state
                .commit(checkpoint)
                .map_err(|err| BuildError::Fatal(err.to_string()))?;
        }
        let state_root = state.commit_state_root()?;

        let encoded: Vec<Vec<u8>> = self.transactions.iter().map(SignedTx::encoded_2718).collect();
        let mut logs_bloom = Bloom::ZERO;
        for receipt in self.receipts.iter() {
            logs_bloom.accrue_bloom(&receipt.logs_bloom);
        }
        let header = Header {
            parent_hash: self.parent_hash,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: self.params.beneficiary,
            state_root,
            transactions_root: trie::ordered_trie_root(&encoded),
            receipts_root: trie::receipts_root(&self.receipts),
            logs_bloom,
            difficulty: U256::ZERO,
            number: self.params.number,
            gas_limit: self.params.gas_limit,
            gas_used: self.gas_used,
            timestamp: self.params.timestamp,
            extra_data: self.extra_data.clone(),
            mix_hash: self.params.prevrandao,
            nonce: B64::ZERO,
            base_fee_per_gas: Some(self.params.base_fee),
            withdrawals_root: Some(EMPTY_ROOT_HASH),
            blob_gas_used: Some(0),
            excess_blob_gas: Some(0),
            parent_beacon_block_root: Some(B256::ZERO),
            ..Default::default()
        };
        let block = Block::new(header, std::mem::take(&mut self.transactions));
        let mut receipts = std::mem::take(&mut self.receipts);
        for receipt in receipts.iter_mut() {
            receipt.block_hash = block.hash;
        }
        if let Err(err) = chain.append(block.clone(), receipts) {
            self.status = BuilderStatus::Aborted;
            return Err(err.into());
        }
        self.status = BuilderStatus::Sealed;
        pool.on_block_added(&block, &*state);
        info!(
            block_number = block.number(),
            block_hash = %block.hash,
            tx_count = block.transactions.len(),
            gas_used = self.gas_used,
            "builder: block sealed"
        );
        Ok(block)
    }
}
