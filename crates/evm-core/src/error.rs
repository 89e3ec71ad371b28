//! Engine errors: pool admission, block building and node operations.

use alloy_primitives::{Bytes, B256, U256};
use evm_db::{ChainError, ErrorKind, StateError, StateKey};
use evm_fork::ForkError;
use evm_tx::RecoveryError;

/// Reasons a transaction is refused by the pool or by a block in progress.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: u64 },
    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: u64 },
    #[error("invalid gas limit {gas_limit}: allowed {min}..={max}")]
    InvalidGasLimit { gas_limit: u64, min: u64, max: u64 },
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] RecoveryError),
    #[error("transaction {0} already known")]
    AlreadyKnown(B256),
    #[error("replacement transaction underpriced")]
    ReplacementUnderpriced,
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientBalance { balance: U256, cost: U256 },
    #[error("max fee per gas {max_fee} below base fee {base_fee}")]
    FeeCapTooLow { max_fee: u128, base_fee: u64 },
    #[error("max priority fee exceeds max fee")]
    TipAboveFeeCap,
    #[error("transaction data size {size} exceeds {limit}")]
    Oversized { size: usize, limit: usize },
    #[error("transaction pool is full")]
    PoolFull,
    #[error("sender already has {0} transactions queued")]
    SenderLimit(usize),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("transaction {0} not found in pool")]
    NotInPool(B256),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::NotInPool(_) => ErrorKind::NotFound,
            _ => ErrorKind::Validation,
        }
    }
}

/// Block building failures. Validation errors leave the transaction in the
/// pool; `MissingState` asks the caller to fetch and retry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] PoolError),
    #[error("transaction gas limit {gas_limit} exceeds remaining block gas {remaining}")]
    GasLimitExceeded { gas_limit: u64, remaining: u64 },
    #[error("state entry {0:?} must be fetched before executing")]
    MissingState(StateKey),
    #[error("builder is {0}, expected {1}")]
    WrongStatus(&'static str, &'static str),
    #[error("block build aborted: {0}")]
    Fatal(String),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Validation(_) | BuildError::GasLimitExceeded { .. } => {
                ErrorKind::Validation
            }
            BuildError::MissingState(_) => ErrorKind::Transport,
            BuildError::WrongStatus(..) | BuildError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the transaction should stay in the pool for a later block.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl From<StateError> for BuildError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Missing(key) => BuildError::MissingState(key),
            other => BuildError::Fatal(other.to_string()),
        }
    }
}

impl From<ChainError> for BuildError {
    fn from(err: ChainError) -> Self {
        BuildError::Fatal(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Fork(#[from] ForkError),
    #[error("execution reverted")]
    Reverted { output: Bytes },
    #[error("execution halted: {0}")]
    Halted(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("snapshot {0:#x} not found")]
    SnapshotNotFound(u64),
    #[error("block {0} not found")]
    BlockNotFound(String),
    #[error("state entry {0:?} must be fetched from the fork source first")]
    FetchDeferred(StateKey),
    #[error("node is not ready: {0}")]
    NotReady(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Pool(err) => err.kind(),
            NodeError::Build(err) => err.kind(),
            NodeError::State(err) => err.kind(),
            NodeError::Chain(err) => err.kind(),
            NodeError::Fork(_) | NodeError::FetchDeferred(_) => ErrorKind::Transport,
            NodeError::Reverted { .. } | NodeError::Halted(_) => ErrorKind::Execution,
            NodeError::InvalidInput(_) => ErrorKind::Validation,
            NodeError::AccountNotFound(_)
            | NodeError::SnapshotNotFound(_)
            | NodeError::BlockNotFound(_) => ErrorKind::NotFound,
            NodeError::NotReady(_) | NodeError::Internal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<RecoveryError> for NodeError {
    fn from(err: RecoveryError) -> Self {
        NodeError::Pool(PoolError::InvalidTransaction(err))
    }
}
