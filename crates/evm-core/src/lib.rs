//! Execution side of the node: pool, block builder, EVM glue and the node itself.

pub mod base_fee;
pub mod builder;
pub mod config;
pub mod error;
pub mod exec;
pub mod hash;
pub mod logs;
pub mod node;
pub mod pool;
pub mod time;

pub use builder::{AddedTx, BlockBuilder, BuilderStatus};
pub use config::{ForkConfig, MiningMode, NodeConfig, PoolConfig};
pub use error::{BuildError, NodeError, PoolError};
pub use exec::{BlockParams, CallRequest, ExecOutcome};
pub use logs::{LogFilter, LogRecord};
pub use node::{
    execution_error, fetch_entry, FetchedEntry, ForkInfo, Node, NodeInfo, SendRequest, SCRIPT_ADDRESS,
};
pub use pool::{PoolContent, PoolEvent, SenderInfo, TxPool, TxStatus, TxsByPriceAndNonce};
pub use time::BlockClock;
