//! Storage side of the node: state manager, chain store and trie roots.

pub mod chain;
pub mod error;
pub mod overlay;
pub mod state;
pub mod trie;
pub mod types;

pub use chain::{ChainStore, TxLocation};
pub use error::{ChainError, ErrorKind, StateError};
pub use state::{
    CheckpointId, DumpedAccount, FlatState, HistoricalState, StateDump, StateManager, StateRead,
};
pub use types::{AccountState, Block, LogEntry, StateKey, TxReceipt, KECCAK_EMPTY};
