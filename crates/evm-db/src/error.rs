//! Error kinds shared by every subsystem.

use crate::types::StateKey;
use alloy_primitives::B256;

/// Coarse classification used when an error crosses the RPC boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Execution,
    Transport,
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Fork cache miss; the caller fetches the key and retries.
    #[error("state entry {0:?} is not cached yet")]
    Missing(StateKey),
    #[error("state root {0} not found")]
    StateRootNotFound(B256),
    #[error("checkpoint {got} is not the innermost open checkpoint ({depth} open)")]
    UnbalancedCheckpoint { got: usize, depth: usize },
    #[error("operation needs all checkpoints closed, {0} still open")]
    CheckpointOpen(usize),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Missing(_) => ErrorKind::Transport,
            StateError::StateRootNotFound(_) => ErrorKind::NotFound,
            StateError::UnbalancedCheckpoint { .. } | StateError::CheckpointOpen(_) => {
                ErrorKind::Fatal
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("block {got} does not extend head {head}")]
    NotContiguous { head: u64, got: u64 },
    #[error("block {number} parent hash does not match head")]
    ParentMismatch { number: u64 },
    #[error("block {0} not found")]
    BlockNotFound(String),
    #[error("cannot roll back past block {0}")]
    RollbackPastBase(u64),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::BlockNotFound(_) => ErrorKind::NotFound,
            ChainError::RollbackPastBase(_) => ErrorKind::Validation,
            ChainError::NotContiguous { .. } | ChainError::ParentMismatch { .. } => {
                ErrorKind::Fatal
            }
        }
    }
}
