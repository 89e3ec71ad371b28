//! Which requests name immutable data and may be served from a cache.
//!
//! A request is cacheable iff every block-identifying parameter is a hex
//! number or a hash. Floating tags and methods without a block qualifier
//! are never cached. Being cacheable is not enough to be stored: the
//! dispatcher also checks the [`CacheAnchor`] has settled below the head.

use crate::block_id::BlockId;
use serde_json::Value;

/// Methods keyed by a block or transaction hash.
const HASH_KEYED: &[&str] = &[
    "eth_getBlockByHash",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_getBlockTransactionCountByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getBlockReceipts",
];

/// Methods keyed by a transaction hash; the block is only known from the
/// result.
const TX_KEYED: &[&str] = &["eth_getTransactionByHash", "eth_getTransactionReceipt"];

pub fn is_hash_keyed(method: &str) -> bool {
    HASH_KEYED.contains(&method)
}

/// Position of the block selector for methods that take one.
fn block_param_index(method: &str) -> Option<usize> {
    match method {
        "eth_getBlockByNumber"
        | "eth_getBlockByHash"
        | "eth_getBlockTransactionCountByNumber"
        | "eth_getBlockTransactionCountByHash"
        | "eth_getTransactionByBlockNumberAndIndex"
        | "eth_getTransactionByBlockHashAndIndex"
        | "eth_getBlockReceipts" => Some(0),
        "eth_getBalance" | "eth_getCode" | "eth_getTransactionCount" | "eth_call"
        | "eth_estimateGas" => Some(1),
        "eth_getStorageAt" | "eth_getProof" => Some(2),
        _ => None,
    }
}

/// What a cacheable result belongs to. It may be stored only once that block
/// is below the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheAnchor {
    /// The block named in the request; hashes still need resolving.
    Block(BlockId),
    /// The `blockNumber` of the returned transaction or receipt, which is
    /// null while it is pending.
    ResultBlock,
}

pub fn is_cacheable(method: &str, params: &Value) -> bool {
    cache_anchor(method, params).is_some()
}

/// Anchor of a cacheable request; `None` when the request is not cacheable.
pub fn cache_anchor(method: &str, params: &Value) -> Option<CacheAnchor> {
    let empty = Vec::new();
    let items = match params {
        Value::Array(items) => items,
        Value::Null => &empty,
        _ => return None,
    };
    if TX_KEYED.contains(&method) {
        return items
            .first()
            .is_some_and(Value::is_string)
            .then_some(CacheAnchor::ResultBlock);
    }
    if method == "eth_getLogs" {
        return items.first().and_then(log_filter_anchor);
    }
    items
        .get(block_param_index(method)?)
        .and_then(|value| BlockId::parse(value).ok())
        .filter(BlockId::is_pinned)
        .map(CacheAnchor::Block)
}

/// A log filter is pinned by `blockHash`, or by numbers at both ends. The
/// upper bound decides when it settles.
fn log_filter_anchor(filter: &Value) -> Option<CacheAnchor> {
    if let Some(hash) = filter.get("blockHash") {
        return BlockId::parse(hash).ok().map(CacheAnchor::Block);
    }
    if !log_filter_is_pinned(filter) {
        return None;
    }
    filter
        .get("toBlock")
        .and_then(|value| BlockId::parse(value).ok())
        .map(CacheAnchor::Block)
}

fn log_filter_is_pinned(filter: &Value) -> bool {
    let pinned = |key: &str| {
        filter
            .get(key)
            .and_then(|value| BlockId::parse(value).ok())
            .is_some_and(|id| id.is_pinned())
    };
    pinned("fromBlock") && pinned("toBlock")
}

/// Lower-cases hex strings so checksummed and plain addresses share a key.
pub fn normalize_params(params: &Value) -> Value {
    match params {
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            Value::String(s.to_ascii_lowercase())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_params).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_params(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Stable cache key for `(method, normalized params)`.
pub fn cache_key(method: &str, params: &Value) -> String {
    format!("{method}:{}", normalize_params(params))
}
