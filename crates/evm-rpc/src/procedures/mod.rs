//! Method handlers, one module per namespace.

mod anvil;
mod eth;
mod fork;
mod tevm;

pub(crate) use fork::{plan_relay, Relay};

use crate::error::RpcError;
use crate::filters::FilterRegistry;
use crate::params::Params;
use evm_core::{Node, NodeError};
use evm_db::Block;
use evm_rpc_types::{BlockId, BlockTag};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;

/// Everything a handler may touch. Held behind the dispatcher's engine lock.
pub(crate) struct Engine {
    pub(crate) node: Node,
    pub(crate) filters: FilterRegistry,
    /// Bumped on every history rewrite.
    pub(crate) history: u64,
}

impl Engine {
    pub(crate) fn new(node: Node, filters: FilterRegistry) -> Self {
        Self {
            node,
            filters,
            history: 0,
        }
    }
}

/// `tevm_` methods with their own handlers; every other `tevm_` name is an
/// `anvil_` alias.
const TEVM_NATIVE: &[&str] = &[
    "tevm_call",
    "tevm_script",
    "tevm_dumpState",
    "tevm_loadState",
    "tevm_getAccount",
];

/// Methods that rewrite history, invalidating cached responses.
const CLEARS_CACHE: &[&str] = &[
    "anvil_loadState",
    "anvil_rollback",
    "anvil_revert",
    "evm_revert",
    "tevm_loadState",
];

/// Read-only methods. Their fork misses are fetched with the engine
/// unlocked and the method is run again.
const DEFERS_FETCHES: &[&str] = &[
    "eth_getBalance",
    "eth_getTransactionCount",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_call",
    "eth_estimateGas",
    "tevm_call",
    "tevm_script",
    "tevm_getAccount",
];

/// Maps `hardhat_`, `ganache_` and aliased `tevm_` names onto `anvil_`.
pub(crate) fn canonical_method(method: &str) -> Cow<'_, str> {
    if let Some(rest) = method
        .strip_prefix("hardhat_")
        .or_else(|| method.strip_prefix("ganache_"))
    {
        return Cow::Owned(format!("anvil_{rest}"));
    }
    match method.strip_prefix("tevm_") {
        Some(rest) if !TEVM_NATIVE.contains(&method) => Cow::Owned(format!("anvil_{rest}")),
        _ => Cow::Borrowed(method),
    }
}

pub(crate) fn clears_cache(method: &str) -> bool {
    CLEARS_CACHE.contains(&method)
}

pub(crate) fn defers_fetches(method: &str) -> bool {
    DEFERS_FETCHES.contains(&method)
}

pub(crate) async fn route(engine: &mut Engine, method: &str, params: Params<'_>) -> Result<Value, RpcError> {
    match method.split_once('_').map(|(namespace, _)| namespace) {
        Some("eth" | "net" | "web3" | "txpool") => eth::handle(engine, method, params).await,
        Some("anvil" | "evm") => anvil::handle(&mut engine.node, method, params).await,
        Some("tevm") => tevm::handle(&mut engine.node, method, params).await,
        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

pub(crate) fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|err| RpcError::Internal(format!("encode result: {err}")))
}

pub(crate) fn quantity(n: u64) -> Value {
    Value::String(format!("{n:#x}"))
}

/// Block number named by `id`. `None` for floating tags, which read the head
/// including unmined cheatcode writes.
fn state_at(node: &Node, id: BlockId) -> Result<Option<u64>, RpcError> {
    match id {
        BlockId::Tag(BlockTag::Number(number)) => Ok(Some(number)),
        BlockId::Tag(BlockTag::Earliest) => Ok(Some(0)),
        BlockId::Tag(_) => Ok(None),
        BlockId::Hash(hash) => node
            .chain()
            .block_by_hash(&hash)
            .map(|block| Some(block.number()))
            .ok_or_else(|| NodeError::BlockNotFound(format!("{hash:#x}")).into()),
    }
}

fn block_by_id(node: &Node, id: BlockId) -> Option<&Block> {
    let chain = node.chain();
    match id {
        BlockId::Tag(BlockTag::Number(number)) => chain.block_by_number(number),
        BlockId::Tag(BlockTag::Earliest) => chain.block_by_number(0),
        BlockId::Tag(_) => Some(chain.head()),
        BlockId::Hash(hash) => chain.block_by_hash(&hash),
    }
}

/// Explicit block number of a log filter bound; `None` for floating tags.
pub(crate) fn filter_bound(node: &Node, value: Option<&Value>) -> Result<Option<u64>, RpcError> {
    state_at(node, BlockId::parse_optional(value).map_err(RpcError::InvalidParams)?)
}
