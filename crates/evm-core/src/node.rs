//! Node: owns state, chain, pool and clock. Drives mining and resolves fork
//! cache misses by fetching upstream and running the operation again.
//!
//! With deferred fetches on, a miss is handed back as
//! [`NodeError::FetchDeferred`] instead; the caller runs [`fetch_entry`]
//! without holding the node, applies it with [`Node::apply_fetched`] and
//! retries.

use crate::base_fee::compute_next_base_fee;
use crate::builder::BlockBuilder;
use crate::config::{MiningMode, NodeConfig, TX_BASE_GAS};
use crate::error::{BuildError, NodeError};
use crate::exec::{execute, BlockParams, CallRequest, ExecError, ExecOptions, ExecOutcome};
use crate::hash;
use crate::logs::{collect_logs, LogFilter, LogRecord};
use crate::pool::{PoolEvent, SenderInfo, TxPool};
use crate::time::{self, BlockClock};
use alloy_consensus::constants::{EMPTY_OMMER_ROOT_HASH, EMPTY_ROOT_HASH};
use alloy_consensus::Header;
use alloy_primitives::{Address, Bytes, B256, U256};
use evm_db::{
    AccountState, Block, ChainStore, StateDump, StateError, StateKey, StateManager, StateRead,
};
use evm_fork::{ForkClient, ForkTransport, HttpTransport};
use evm_tx::{impersonated_tx, recover_raw_tx, SignedTx, UnsignedTx};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Upper bound on fetch-and-retry rounds for one operation.
const MAX_FORK_ROUNDS: usize = 1024;
const DEFAULT_PRIORITY_FEE: u128 = 1_000_000_000;
/// Where `tevm_script` bytecode is installed when no target is given.
pub const SCRIPT_ADDRESS: Address = Address::new([
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x5c, 0x41,
]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForkInfo {
    pub block_number: u64,
    pub block_hash: B256,
    pub chain_id: u64,
}

struct Fork {
    client: ForkClient,
    info: ForkInfo,
}

#[derive(Clone, Copy, Debug)]
struct Snapshot {
    state_root: B256,
    head: u64,
    clock: BlockClock,
    base_fee: u64,
}

/// A state entry read from the fork source, ready to be cached locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedEntry {
    /// `None` for an account that does not exist upstream.
    Account(Address, Option<(u64, U256, Bytes)>),
    Storage(Address, B256, U256),
    BlockHash(u64, B256),
}

/// Reads `key` from the fork source at `fork_block`.
pub async fn fetch_entry(client: &ForkClient, fork_block: u64, key: StateKey) -> Result<FetchedEntry, NodeError> {
    debug!(?key, fork_block, "node: resolving fork miss");
    let entry = match key {
        StateKey::Account(address) => {
            let account = client.account_at(address, fork_block).await?;
            let fetched = (!account.is_empty()).then_some((account.nonce, account.balance, account.code));
            FetchedEntry::Account(address, fetched)
        }
        StateKey::Storage(address, slot) => {
            let value = client
                .storage_at(address, U256::from_be_bytes(slot.0), fork_block)
                .await?;
            FetchedEntry::Storage(address, slot, value)
        }
        StateKey::BlockHash(number) => {
            FetchedEntry::BlockHash(number, client.block_hash(number).await?.unwrap_or_default())
        }
    };
    Ok(entry)
}

/// `eth_sendTransaction` fields for an impersonated sender.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendRequest {
    pub call: CallRequest,
    pub nonce: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: B256,
    pub timestamp: u64,
    pub base_fee: u64,
    pub gas_limit: u64,
    pub mining: MiningMode,
    pub fork: Option<ForkInfo>,
    pub pending: usize,
    pub queued: usize,
}

pub struct Node {
    config: NodeConfig,
    chain_id: u64,
    state: StateManager,
    chain: ChainStore,
    pool: TxPool,
    clock: BlockClock,
    base_fee: u64,
    mining: MiningMode,
    /// Local state root per block number.
    roots: BTreeMap<u64, B256>,
    impersonated: HashSet<Address>,
    snapshots: BTreeMap<u64, Snapshot>,
    next_snapshot: u64,
    fork: Option<Fork>,
    defer_fetches: bool,
}

impl Node {
    /// A node starting from a synthetic genesis block.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let mut state = StateManager::new();
        for (address, balance) in config.genesis_accounts.iter() {
            state.put_account(*address, AccountState::new(0, *balance));
        }
        let state_root = state.commit_state_root()?;
        let header = Header {
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: config.coinbase,
            state_root,
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            number: 0,
            gas_limit: config.block_gas_limit,
            timestamp: config.genesis_timestamp.unwrap_or_else(time::now_sec),
            base_fee_per_gas: Some(config.base_fee),
            ..Default::default()
        };
        let genesis = Block::new(header, Vec::new());
        info!(
            chain_id = config.chain_id,
            genesis_hash = %genesis.hash,
            accounts = config.genesis_accounts.len(),
            "node: genesis created"
        );
        let chain = ChainStore::new(genesis);
        let chain_id = config.chain_id;
        let base_fee = config.base_fee;
        Ok(Self::assemble(
            config, chain_id, state, chain, state_root, base_fee, None,
        ))
    }

    /// A node whose state is lazily read from `transport` at the configured
    /// fork block.
    pub async fn fork(config: NodeConfig, transport: Arc<dyn ForkTransport>) -> Result<Self, NodeError> {
        let fork_config = config.fork.clone().unwrap_or_default();
        let client = ForkClient::new(transport, fork_config.retry_policy());
        let chain_id = client.chain_id().await?;
        let number = match fork_config.block_number {
            Some(number) => number,
            None => client.block_number().await?,
        };
        let remote = client
            .header_at(number)
            .await?
            .ok_or_else(|| NodeError::BlockNotFound(number.to_string()))?;
        let gas_limit = remote.gas_limit.to::<u64>();
        let gas_used = remote.gas_used.to::<u64>();
        let header = Header {
            parent_hash: remote.parent_hash,
            ommers_hash: EMPTY_OMMER_ROOT_HASH,
            beneficiary: remote.miner,
            state_root: remote.state_root,
            difficulty: remote.difficulty,
            number,
            gas_limit,
            gas_used,
            timestamp: remote.timestamp(),
            extra_data: remote.extra_data.clone(),
            mix_hash: remote.mix_hash,
            nonce: remote.nonce,
            base_fee_per_gas: remote.base_fee(),
            ..Default::default()
        };
        let base = Block::with_hash(header, remote.hash);
        let mut state = StateManager::forked();
        let state_root = state.commit_state_root()?;
        let base_fee = match remote.base_fee() {
            Some(fee) => compute_next_base_fee(fee, gas_used, gas_limit),
            None => config.base_fee,
        };
        let info = ForkInfo {
            block_number: number,
            block_hash: remote.hash,
            chain_id,
        };
        info!(fork_block = number, fork_hash = %remote.hash, chain_id, "node: forked");
        let chain = ChainStore::forked(base);
        Ok(Self::assemble(
            config,
            chain_id,
            state,
            chain,
            state_root,
            base_fee,
            Some(Fork { client, info }),
        ))
    }

    /// Forks over HTTP when a fork URL is configured, otherwise starts from genesis.
    pub async fn from_config(config: NodeConfig) -> Result<Self, NodeError> {
        match config.fork.as_ref() {
            Some(fork) => {
                let timeout = Duration::from_millis(fork.request_timeout_ms.max(1));
                let transport = HttpTransport::new(&fork.url, timeout)?;
                Self::fork(config, Arc::new(transport)).await
            }
            None => Self::new(config),
        }
    }

    fn assemble(
        config: NodeConfig,
        chain_id: u64,
        state: StateManager,
        chain: ChainStore,
        state_root: B256,
        base_fee: u64,
        fork: Option<Fork>,
    ) -> Self {
        let mut roots = BTreeMap::new();
        roots.insert(chain.latest_number(), state_root);
        Self {
            pool: TxPool::new(config.pool.clone(), config.block_gas_limit),
            clock: BlockClock::new(config.block_time),
            mining: config.mining,
            config,
            chain_id,
            state,
            chain,
            base_fee,
            roots,
            impersonated: HashSet::new(),
            snapshots: BTreeMap::new(),
            next_snapshot: 1,
            fork,
            defer_fetches: false,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn chain(&self) -> &ChainStore {
        &self.chain
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn pool(&self) -> &TxPool {
        &self.pool
    }

    pub fn subscribe_pool(&self) -> broadcast::Receiver<PoolEvent> {
        self.pool.subscribe()
    }

    /// Base fee the next block will charge.
    pub fn base_fee(&self) -> u64 {
        self.base_fee
    }

    /// Suggested legacy gas price: next base fee plus a default tip.
    pub fn gas_price(&self) -> u128 {
        u128::from(self.base_fee) + DEFAULT_PRIORITY_FEE
    }

    pub fn block_number(&self) -> u64 {
        self.chain.latest_number()
    }

    pub fn mining_mode(&self) -> MiningMode {
        self.mining
    }

    pub fn set_automine(&mut self, enabled: bool) {
        self.mining = if enabled {
            MiningMode::Auto
        } else {
            MiningMode::Manual
        };
    }

    pub fn fork_info(&self) -> Option<ForkInfo> {
        self.fork.as_ref().map(|fork| fork.info)
    }

    pub fn fork_client(&self) -> Option<ForkClient> {
        self.fork.as_ref().map(|fork| fork.client.clone())
    }

    /// While on, fork misses fail with [`NodeError::FetchDeferred`] rather
    /// than being fetched in place. Only read-only operations should run
    /// this way; mining always fetches in place.
    pub fn set_deferred_fetches(&mut self, deferred: bool) {
        self.defer_fetches = deferred;
    }

    /// Caches an entry from [`fetch_entry`]. Fork values are fixed at the
    /// fork block, so applying one twice is harmless.
    pub fn apply_fetched(&mut self, entry: FetchedEntry) {
        match entry {
            FetchedEntry::Account(address, fetched) => self.state.cache_remote_account(address, fetched),
            FetchedEntry::Storage(address, slot, value) => self.state.cache_remote_storage(address, slot, value),
            FetchedEntry::BlockHash(number, hash) => self.chain.cache_remote_hash(number, hash),
        }
    }

    pub fn node_info(&self) -> NodeInfo {
        let head = self.chain.head();
        NodeInfo {
            chain_id: self.chain_id,
            block_number: head.number(),
            block_hash: head.hash,
            timestamp: head.timestamp(),
            base_fee: self.base_fee,
            gas_limit: self.config.block_gas_limit,
            mining: self.mining,
            fork: self.fork_info(),
            pending: self.pool.pending_count(),
            queued: self.pool.queued_count(),
        }
    }

    /// Local state root recorded for block `number`.
    pub fn state_root_at(&self, number: u64) -> Result<B256, NodeError> {
        self.roots
            .get(&number)
            .copied()
            .ok_or_else(|| NodeError::BlockNotFound(number.to_string()))
    }

    /// `None` for reads at the head, which see unmined cheatcode writes too.
    fn historical_root(&self, at: Option<u64>) -> Result<Option<B256>, NodeError> {
        match at {
            Some(number) if number != self.chain.latest_number() => {
                self.state_root_at(number).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Fetches the entry behind a fork cache miss, or hands the key back
    /// when fetches are deferred.
    async fn resolve(&mut self, key: StateKey) -> Result<(), NodeError> {
        let Some(fork) = self.fork.as_ref() else {
            return Err(NodeError::Internal(format!(
                "state entry {key:?} missing without a fork source"
            )));
        };
        if self.defer_fetches {
            return Err(NodeError::FetchDeferred(key));
        }
        let client = fork.client.clone();
        let entry = fetch_entry(&client, fork.info.block_number, key).await?;
        self.apply_fetched(entry);
        Ok(())
    }

    /// Runs `read` against the state at block `at` (head when `None`),
    /// fetching fork entries until it succeeds.
    pub async fn read_state<T, F>(&mut self, at: Option<u64>, read: F) -> Result<T, NodeError>
    where
        F: Fn(&dyn StateRead) -> Result<T, StateError>,
    {
        let root = self.historical_root(at)?;
        for _ in 0..MAX_FORK_ROUNDS {
            let result = match root.as_ref() {
                Some(root) => {
                    let view = self.state.at_root(root)?;
                    read(&view)
                }
                None => read(&self.state),
            };
            match result {
                Err(StateError::Missing(key)) => self.resolve(key).await?,
                other => return other.map_err(NodeError::from),
            }
        }
        Err(NodeError::Internal("fork resolution did not converge".to_string()))
    }

    async fn write_state<T, F>(&mut self, mut write: F) -> Result<T, NodeError>
    where
        F: FnMut(&mut StateManager) -> Result<T, StateError>,
    {
        for _ in 0..MAX_FORK_ROUNDS {
            match write(&mut self.state) {
                Err(StateError::Missing(key)) => self.resolve(key).await?,
                other => return other.map_err(NodeError::from),
            }
        }
        Err(NodeError::Internal("fork resolution did not converge".to_string()))
    }

    pub async fn get_account(
        &mut self,
        address: Address,
        at: Option<u64>,
    ) -> Result<Option<AccountState>, NodeError> {
        self.read_state(at, |state| state.account(&address)).await
    }

    pub async fn get_balance(&mut self, address: Address, at: Option<u64>) -> Result<U256, NodeError> {
        self.read_state(at, |state| state.balance_of(&address)).await
    }

    pub async fn get_nonce(&mut self, address: Address, at: Option<u64>) -> Result<u64, NodeError> {
        self.read_state(at, |state| state.nonce_of(&address)).await
    }

    pub async fn get_code(&mut self, address: Address, at: Option<u64>) -> Result<Bytes, NodeError> {
        self.read_state(at, |state| state.code_of(&address)).await
    }

    pub async fn get_storage_at(
        &mut self,
        address: Address,
        slot: B256,
        at: Option<u64>,
    ) -> Result<U256, NodeError> {
        self.read_state(at, |state| state.storage(&address, &slot)).await
    }

    fn call_params(&self, at: Option<u64>) -> Result<BlockParams, NodeError> {
        let head = self.chain.head();
        let (number, timestamp, parent_hash) = match at {
            Some(number) if number != head.number() => {
                let block = self
                    .chain
                    .block_by_number(number)
                    .ok_or_else(|| NodeError::BlockNotFound(number.to_string()))?;
                (number, block.timestamp(), block.header.parent_hash)
            }
            _ => (
                head.number() + 1,
                self.clock.now().max(head.timestamp() + 1),
                head.hash,
            ),
        };
        Ok(BlockParams {
            number,
            timestamp,
            beneficiary: self.config.coinbase,
            gas_limit: self.config.block_gas_limit,
            base_fee: self.base_fee,
            prevrandao: hash::prevrandao(parent_hash, number),
        })
    }

    fn try_call(
        &mut self,
        request: &CallRequest,
        root: Option<&B256>,
        params: &BlockParams,
        code: Option<&Bytes>,
    ) -> Result<ExecOutcome, ExecError> {
        let tx = request.tx_env(params.gas_limit, 0, self.chain_id);
        let options = ExecOptions::call(self.chain_id);
        if let Some(root) = root {
            let view = self
                .state
                .at_root(root)
                .map_err(|err| ExecError::Fatal(err.to_string()))?;
            return execute(&view, &self.chain, params, options, tx);
        }
        let Some(code) = code else {
            return execute(&self.state, &self.chain, params, options, tx);
        };
        let target = request.to.unwrap_or(SCRIPT_ADDRESS);
        let checkpoint = self.state.checkpoint();
        let result = match self.state.put_code(target, code.clone()) {
            Ok(()) => execute(&self.state, &self.chain, params, options, tx),
            Err(StateError::Missing(key)) => Err(ExecError::Missing(key)),
            Err(err) => Err(ExecError::Fatal(err.to_string())),
        };
        self.state
            .revert(checkpoint)
            .map_err(|err| ExecError::Fatal(err.to_string()))?;
        result
    }

    async fn run_call(
        &mut self,
        request: &CallRequest,
        at: Option<u64>,
        code: Option<&Bytes>,
    ) -> Result<ExecOutcome, NodeError> {
        let root = self.historical_root(at)?;
        let params = self.call_params(at)?;
        for _ in 0..MAX_FORK_ROUNDS {
            match self.try_call(request, root.as_ref(), &params, code) {
                Ok(outcome) => return Ok(outcome),
                Err(ExecError::Missing(key)) => self.resolve(key).await?,
                Err(ExecError::Invalid(err)) => return Err(err.into()),
                Err(ExecError::Fatal(reason)) => return Err(NodeError::Internal(reason)),
            }
        }
        Err(NodeError::Internal("fork resolution did not converge".to_string()))
    }

    /// Executes a message without committing. Reverts come back as a
    /// non-successful outcome, not an error.
    pub async fn call(&mut self, request: CallRequest, at: Option<u64>) -> Result<ExecOutcome, NodeError> {
        self.run_call(&request, at, None).await
    }

    /// Like [`call`](Self::call), with `code` installed at the target (or at
    /// [`SCRIPT_ADDRESS`]) for the duration of the call.
    pub async fn call_with_code(&mut self, mut request: CallRequest, code: Bytes) -> Result<ExecOutcome, NodeError> {
        request.to = Some(request.to.unwrap_or(SCRIPT_ADDRESS));
        self.run_call(&request, None, Some(&code)).await
    }

    /// Smallest gas limit under which `request` succeeds.
    pub async fn estimate_gas(&mut self, request: CallRequest, at: Option<u64>) -> Result<u64, NodeError> {
        let cap = request.gas.unwrap_or(self.config.block_gas_limit);
        let mut trial = request;
        trial.gas = Some(cap);
        let outcome = self.run_call(&trial, at, None).await?;
        if !outcome.success {
            return Err(execution_error(&outcome));
        }
        let mut low = outcome.gas_used.saturating_sub(1).max(TX_BASE_GAS - 1);
        let mut high = cap;
        while low + 1 < high {
            let mid = low + (high - low) / 2;
            trial.gas = Some(mid);
            match self.run_call(&trial, at, None).await {
                Ok(outcome) if outcome.success => high = mid,
                Ok(_) | Err(NodeError::Pool(_)) => low = mid,
                Err(err) => return Err(err),
            }
        }
        Ok(high)
    }

    pub async fn send_raw_transaction(&mut self, raw: &[u8]) -> Result<B256, NodeError> {
        let tx = recover_raw_tx(raw, self.chain_id)?;
        self.submit(tx).await
    }

    /// Submits an unsigned transaction from an impersonated account.
    pub async fn send_transaction(&mut self, request: SendRequest) -> Result<B256, NodeError> {
        let from = request
            .call
            .from
            .ok_or_else(|| NodeError::InvalidInput("missing from".to_string()))?;
        if !self.impersonated.contains(&from) {
            return Err(NodeError::InvalidInput(format!(
                "no signer for {from}; impersonate it or send a signed transaction"
            )));
        }
        let state_nonce = self.get_nonce(from, None).await?;
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.pool.next_nonce(&from, state_nonce),
        };
        let gas_limit = match request.call.gas {
            Some(gas) => gas,
            None => self.estimate_gas(request.call.clone(), None).await?,
        };
        let priority = request
            .max_priority_fee_per_gas
            .unwrap_or(DEFAULT_PRIORITY_FEE);
        let max_fee = request
            .max_fee_per_gas
            .or(request.call.gas_price)
            .unwrap_or_else(|| u128::from(self.base_fee) * 2 + priority);
        let tx = impersonated_tx(
            UnsignedTx {
                from,
                to: request.call.to,
                value: request.call.value,
                input: request.call.data,
                gas_limit,
                nonce,
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority.min(max_fee),
                access_list: Default::default(),
            },
            self.chain_id,
        );
        self.submit(tx).await
    }

    async fn submit(&mut self, tx: SignedTx) -> Result<B256, NodeError> {
        let sender = tx.sender();
        let account = self
            .read_state(None, |state| {
                Ok(SenderInfo {
                    nonce: state.nonce_of(&sender)?,
                    balance: state.balance_of(&sender)?,
                })
            })
            .await?;
        let hash = self.pool.add(tx, account)?;
        info!(tx_hash = %hash, sender = %sender, "node: transaction accepted");
        if self.mining == MiningMode::Auto && self.pool.pending_count() > 0 {
            self.mine_block().await?;
        }
        Ok(hash)
    }

    /// Mines `blocks` blocks; zero mines nothing. With `interval`, each
    /// block after the first is that many seconds after its parent.
    pub async fn mine(&mut self, blocks: u64, interval: Option<u64>) -> Result<Vec<Block>, NodeError> {
        let mut mined = Vec::new();
        for index in 0..blocks {
            if let (true, Some(step)) = (index > 0, interval) {
                let parent = self.chain.head().timestamp();
                self.clock.set_next_timestamp(parent.saturating_add(step));
            }
            mined.push(self.mine_block().await?);
        }
        Ok(mined)
    }

    /// Builds one block from the pool in price/nonce order and seals it.
    pub async fn mine_block(&mut self) -> Result<Block, NodeError> {
        let parent = self.chain.head();
        let parent_hash = parent.hash;
        let number = parent.number() + 1;
        let parent_timestamp = parent.timestamp();
        let timestamp = self.clock.next_block_timestamp(parent_timestamp);
        let params = BlockParams {
            number,
            timestamp,
            beneficiary: self.config.coinbase,
            gas_limit: self.config.block_gas_limit,
            base_fee: self.base_fee,
            prevrandao: hash::prevrandao(parent_hash, number),
        };
        let mut builder = BlockBuilder::new(parent_hash, params, self.chain_id);
        let mut candidates = self.pool.txs_by_price_and_nonce(self.base_fee);
        let mut rounds = 0usize;
        while let Some(tx) = candidates.peek().cloned() {
            if builder.remaining_gas() < TX_BASE_GAS {
                break;
            }
            match builder.add_transaction(&mut self.state, &self.chain, &tx) {
                Ok(added) => {
                    debug!(tx_hash = %tx.hash(), status = added.receipt.status, "node: transaction included");
                    candidates.shift();
                }
                Err(BuildError::MissingState(key)) => {
                    rounds += 1;
                    let resolved = if rounds > MAX_FORK_ROUNDS {
                        Err(NodeError::Internal("fork resolution did not converge".to_string()))
                    } else {
                        self.resolve(key).await
                    };
                    if let Err(err) = resolved {
                        builder.abort(&mut self.state)?;
                        warn!(block_number = number, error = %err, "node: build aborted on fork fetch");
                        return Err(err);
                    }
                }
                Err(err) if err.is_validation() => {
                    debug!(tx_hash = %tx.hash(), error = %err, "node: transaction excluded");
                    candidates.pop();
                }
                // Fatal errors have already aborted the builder.
                Err(err) => return Err(err.into()),
            }
        }
        let block = builder.seal(&mut self.state, &mut self.chain, &mut self.pool)?;
        self.roots.insert(block.number(), block.header.state_root);
        self.base_fee = compute_next_base_fee(
            self.base_fee,
            block.header.gas_used,
            block.header.gas_limit,
        );
        Ok(block)
    }

    /// Fixes the next block's timestamp; it must be after the head's.
    pub fn set_next_block_timestamp(&mut self, timestamp: u64) -> Result<(), NodeError> {
        let parent = self.chain.head().timestamp();
        if timestamp <= parent {
            return Err(NodeError::InvalidInput(format!(
                "timestamp {timestamp} is not after the latest block timestamp {parent}"
            )));
        }
        self.clock.set_next_timestamp(timestamp);
        Ok(())
    }

    pub fn set_time(&mut self, timestamp: u64) -> u64 {
        self.clock.set_time(timestamp);
        timestamp
    }

    /// Returns the total clock offset in seconds.
    pub fn increase_time(&mut self, seconds: u64) -> i128 {
        self.clock.increase_time(seconds);
        self.clock.offset()
    }

    pub fn set_block_timestamp_interval(&mut self, interval: Option<u64>) {
        self.clock.set_interval(interval);
    }

    pub fn block_timestamp_interval(&self) -> Option<u64> {
        self.clock.interval()
    }

    pub async fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), NodeError> {
        self.write_state(|state| state.modify_account(address, |account| account.balance = balance))
            .await?;
        Ok(())
    }

    pub async fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), NodeError> {
        self.write_state(|state| state.modify_account(address, |account| account.nonce = nonce))
            .await?;
        self.pool.sync_sender(address, nonce);
        Ok(())
    }

    pub async fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), NodeError> {
        self.write_state(|state| state.put_code(address, code.clone()))
            .await
    }

    pub async fn set_storage_at(&mut self, address: Address, slot: B256, value: U256) -> Result<(), NodeError> {
        self.write_state(|state| {
            state.put_storage(address, slot, value);
            Ok(())
        })
        .await
    }

    pub fn impersonate_account(&mut self, address: Address) {
        self.impersonated.insert(address);
    }

    pub fn stop_impersonating_account(&mut self, address: Address) {
        self.impersonated.remove(&address);
    }

    pub fn is_impersonated(&self, address: &Address) -> bool {
        self.impersonated.contains(address)
    }

    pub fn drop_transaction(&mut self, hash: &B256) -> Option<B256> {
        self.pool.remove(hash).ok().map(|tx| tx.hash())
    }

    pub fn drop_all_transactions(&mut self) {
        self.pool.clear();
    }

    /// Records the current state and head; ids start at 1.
    pub fn snapshot(&mut self) -> Result<u64, NodeError> {
        let state_root = self.state.commit_state_root()?;
        let id = self.next_snapshot;
        self.next_snapshot += 1;
        self.snapshots.insert(
            id,
            Snapshot {
                state_root,
                head: self.chain.latest_number(),
                clock: self.clock,
                base_fee: self.base_fee,
            },
        );
        debug!(snapshot = id, %state_root, "node: snapshot taken");
        Ok(id)
    }

    /// Restores snapshot `id`, discarding it and every later snapshot.
    /// Blocks mined since are removed and their transactions are dropped.
    pub fn revert_to_snapshot(&mut self, id: u64) -> Result<bool, NodeError> {
        let snapshot = self
            .snapshots
            .get(&id)
            .copied()
            .ok_or(NodeError::SnapshotNotFound(id))?;
        self.state.set_state_root(snapshot.state_root)?;
        let removed = self.pop_blocks_to(snapshot.head)?;
        self.clock = snapshot.clock;
        self.base_fee = snapshot.base_fee;
        self.snapshots.retain(|&kept, _| kept < id);
        self.prune_roots();
        self.pool.resync(&self.state);
        info!(snapshot = id, removed_blocks = removed.len(), "node: reverted to snapshot");
        Ok(true)
    }

    /// Removes the newest `depth` blocks and returns their still-valid
    /// transactions to the pool.
    pub fn rollback(&mut self, depth: u64) -> Result<Vec<B256>, NodeError> {
        let head = self.chain.latest_number();
        let base = self.chain.base_number();
        if depth > head - base {
            return Err(evm_db::ChainError::RollbackPastBase(base).into());
        }
        let target = head - depth;
        let root = self.state_root_at(target)?;
        self.state.set_state_root(root)?;
        let removed = self.pop_blocks_to(target)?;
        if let Some(fee) = removed.first().and_then(|block| block.header.base_fee_per_gas) {
            self.base_fee = fee;
        }
        self.snapshots.retain(|_, snapshot| snapshot.head <= target);
        self.prune_roots();
        let requeued = self.pool.on_chain_reorganization(&removed, &[], &self.state);
        info!(depth, new_head = target, requeued = requeued.len(), "node: rolled back");
        Ok(requeued)
    }

    /// Keeps only roots a block or a live snapshot can still return to.
    fn prune_roots(&mut self) {
        let keep: HashSet<B256> = self
            .roots
            .values()
            .copied()
            .chain(self.snapshots.values().map(|snapshot| snapshot.state_root))
            .collect();
        self.state.retain_roots(&keep);
    }

    /// Pops blocks above `number`, oldest first in the result.
    fn pop_blocks_to(&mut self, number: u64) -> Result<Vec<Block>, NodeError> {
        let mut removed = Vec::new();
        while self.chain.latest_number() > number {
            let (block, _) = self.chain.pop_head()?;
            self.roots.remove(&block.number());
            removed.push(block);
        }
        removed.reverse();
        Ok(removed)
    }

    pub fn dump_state(&self) -> StateDump {
        self.state.dump()
    }

    pub fn load_state(&mut self, dump: StateDump) {
        self.state.load(dump);
        self.pool.resync(&self.state);
    }

    pub fn logs(&self, filter: &LogFilter) -> Vec<LogRecord> {
        collect_logs(&self.chain, filter)
    }
}

/// Error for a failed call outcome: revert data or halt reason.
pub fn execution_error(outcome: &ExecOutcome) -> NodeError {
    match outcome.halt.as_ref() {
        Some(reason) => NodeError::Halted(reason.clone()),
        None => NodeError::Reverted {
            output: outcome.output.clone(),
        },
    }
}
