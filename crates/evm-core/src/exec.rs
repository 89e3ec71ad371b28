//! revm bridge: reads through [`StateRead`], applies results to the
//! [`StateManager`].

use crate::error::PoolError;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use evm_db::{ChainStore, LogEntry, StateError, StateKey, StateManager, StateRead, KECCAK_EMPTY};
use evm_tx::SignedTx;
use revm::context::{BlockEnv, Context, TxEnv};
use revm::context_interface::result::{EVMError, ExecutionResult, InvalidTransaction};
use revm::database_interface::{DBErrorMarker, Database, DatabaseRef};
use revm::handler::MainnetContext;
use revm::handler::{ExecuteEvm, MainBuilder};
use revm::primitives::hardfork::SpecId;
use revm::state::{AccountInfo, Bytecode, EvmState};

/// State errors surfaced through revm's database interface.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(transparent)]
pub struct DbError(pub StateError);

impl DBErrorMarker for DbError {}

/// Read-only database over a state view and the chain's block hashes.
pub struct StateDb<'a, S: StateRead> {
    state: &'a S,
    chain: &'a ChainStore,
}

impl<'a, S: StateRead> StateDb<'a, S> {
    pub fn new(state: &'a S, chain: &'a ChainStore) -> Self {
        Self { state, chain }
    }
}

impl<S: StateRead> DatabaseRef for StateDb<'_, S> {
    type Error = DbError;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        let account = self.state.account(&address).map_err(DbError)?;
        Ok(account.map(|account| AccountInfo {
            balance: account.balance,
            nonce: account.nonce,
            code_hash: account.code_hash,
            code: None,
            ..Default::default()
        }))
    }

    fn code_by_hash_ref(&self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(Bytecode::default());
        }
        let code = self.state.code(&code_hash).map_err(DbError)?;
        Ok(Bytecode::new_legacy(code))
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.state
            .storage(&address, &B256::from(index))
            .map_err(DbError)
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        self.chain.block_hash(number).map_err(DbError)
    }
}

impl<S: StateRead> Database for StateDb<'_, S> {
    type Error = DbError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        self.basic_ref(address)
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        self.code_by_hash_ref(code_hash)
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        self.storage_ref(address, index)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        self.block_hash_ref(number)
    }
}

/// Block environment a transaction runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockParams {
    pub number: u64,
    pub timestamp: u64,
    pub beneficiary: Address,
    pub gas_limit: u64,
    pub base_fee: u64,
    pub prevrandao: B256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    pub chain_id: u64,
    pub spec: SpecId,
    /// Skip nonce, balance and base-fee checks (`eth_call` semantics).
    pub unchecked: bool,
    /// Allow senders that hold code.
    pub impersonated: bool,
}

impl ExecOptions {
    pub fn transact(chain_id: u64) -> Self {
        Self {
            chain_id,
            spec: SpecId::CANCUN,
            unchecked: false,
            impersonated: false,
        }
    }

    pub fn call(chain_id: u64) -> Self {
        Self {
            unchecked: true,
            impersonated: true,
            ..Self::transact(chain_id)
        }
    }
}

/// Why revm refused to run a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecError {
    /// Fork cache miss; fetch the key and run again.
    Missing(StateKey),
    /// The transaction is not valid against this state.
    Invalid(PoolError),
    Fatal(String),
}

impl From<EVMError<DbError>> for ExecError {
    fn from(err: EVMError<DbError>) -> Self {
        match err {
            EVMError::Database(DbError(StateError::Missing(key))) => ExecError::Missing(key),
            EVMError::Database(DbError(other)) => ExecError::Fatal(other.to_string()),
            EVMError::Transaction(invalid) => ExecError::Invalid(invalid_tx(invalid)),
            other => ExecError::Fatal(other.to_string()),
        }
    }
}

fn invalid_tx(err: InvalidTransaction) -> PoolError {
    match err {
        InvalidTransaction::NonceTooLow { tx, state } => PoolError::NonceTooLow {
            expected: state,
            got: tx,
        },
        InvalidTransaction::NonceTooHigh { tx, state } => PoolError::NonceTooHigh {
            expected: state,
            got: tx,
        },
        other => PoolError::Rejected(other.to_string()),
    }
}

#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub output: Bytes,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
    /// Halt reason for exceptional failures; `None` for success and revert.
    pub halt: Option<String>,
    pub state: EvmState,
}

impl ExecOutcome {
    pub fn is_revert(&self) -> bool {
        !self.success && self.halt.is_none()
    }
}

/// Runs `tx` against `state` without mutating it.
pub fn execute<S: StateRead>(
    state: &S,
    chain: &ChainStore,
    block: &BlockParams,
    options: ExecOptions,
    tx: TxEnv,
) -> Result<ExecOutcome, ExecError> {
    let db = StateDb::new(state, chain);
    let mut ctx: MainnetContext<StateDb<'_, S>> = Context::new(db, options.spec);
    ctx.block = BlockEnv {
        number: U256::from(block.number),
        timestamp: U256::from(block.timestamp),
        beneficiary: block.beneficiary,
        gas_limit: block.gas_limit,
        basefee: block.base_fee,
        prevrandao: Some(block.prevrandao),
        ..Default::default()
    };
    ctx.cfg.chain_id = options.chain_id;
    ctx.cfg.disable_nonce_check = options.unchecked;
    ctx.cfg.disable_balance_check = options.unchecked;
    ctx.cfg.disable_base_fee = options.unchecked;
    ctx.cfg.disable_block_gas_limit = options.unchecked;
    ctx.cfg.disable_eip3607 = options.impersonated;

    let mut evm = ctx.build_mainnet();
    let result = evm.transact(tx)?;
    let state = result.state;

    let outcome = match result.result {
        ExecutionResult::Success {
            gas_used,
            output,
            logs,
            ..
        } => ExecOutcome {
            success: true,
            gas_used,
            contract_address: output.address().copied(),
            output: output.data().clone(),
            logs: logs
                .into_iter()
                .map(|log| LogEntry {
                    address: log.address,
                    topics: log.data.topics().to_vec(),
                    data: log.data.data.clone(),
                })
                .collect(),
            halt: None,
            state,
        },
        ExecutionResult::Revert { gas_used, output } => ExecOutcome {
            success: false,
            gas_used,
            output,
            contract_address: None,
            logs: Vec::new(),
            halt: None,
            state,
        },
        ExecutionResult::Halt { reason, gas_used } => ExecOutcome {
            success: false,
            gas_used,
            output: Bytes::new(),
            contract_address: None,
            logs: Vec::new(),
            halt: Some(format!("{reason:?}")),
            state,
        },
    };
    Ok(outcome)
}

pub fn tx_env(tx: &SignedTx) -> TxEnv {
    TxEnv {
        tx_type: tx.tx_type(),
        caller: tx.sender(),
        gas_limit: tx.gas_limit(),
        gas_price: tx.max_fee_per_gas(),
        kind: tx.kind(),
        value: tx.value(),
        data: tx.input().clone(),
        nonce: tx.nonce(),
        chain_id: tx.chain_id(),
        access_list: tx.access_list(),
        gas_priority_fee: tx.max_priority_fee_per_gas(),
        ..Default::default()
    }
}

/// Message for `eth_call`, `eth_estimateGas` and `tevm_call`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub value: U256,
    pub data: Bytes,
}

impl CallRequest {
    pub fn tx_env(&self, gas_limit: u64, nonce: u64, chain_id: u64) -> TxEnv {
        TxEnv {
            tx_type: 0,
            caller: self.from.unwrap_or_default(),
            gas_limit: self.gas.unwrap_or(gas_limit),
            gas_price: self.gas_price.unwrap_or(0),
            kind: match self.to {
                Some(to) => TxKind::Call(to),
                None => TxKind::Create,
            },
            value: self.value,
            data: self.data.clone(),
            nonce,
            chain_id: Some(chain_id),
            ..Default::default()
        }
    }
}

/// Writes revm's post-state into the innermost checkpoint.
pub fn apply_state_changes(state: &mut StateManager, changes: EvmState) {
    for (address, account) in changes.into_iter() {
        if !account.is_touched() {
            continue;
        }
        if account.is_selfdestructed() || account.is_empty() {
            state.delete_account(address);
            continue;
        }
        if account.is_created() {
            state.clear_storage(address);
        }

        let info = &account.info;
        let code_hash = match info.code.as_ref() {
            Some(code) if !code.is_empty() => state.insert_code(code.original_bytes()),
            _ => info.code_hash,
        };
        state.put_account(
            address,
            evm_db::AccountState {
                nonce: info.nonce,
                balance: info.balance,
                code_hash,
            },
        );

        for (slot, entry) in account.changed_storage_slots() {
            state.put_storage(address, B256::from(*slot), entry.present_value);
        }
    }
}
