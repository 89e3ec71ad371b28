//! Requests a forked node forwards to its source: blocks at or below the
//! fork block and state reads pinned to them.

use super::quantity;
use evm_core::Node;
use evm_fork::ForkClient;
use evm_rpc_types::{BlockId, BlockTag};
use serde_json::Value;

pub(crate) enum Relay {
    Local,
    Upstream(ForkClient),
    /// `eth_getLogs` reaching the fork block: the older part upstream, any
    /// newer part locally, concatenated in block order.
    SplitLogs {
        client: ForkClient,
        upstream: Value,
        local: Option<Value>,
    },
}

enum Selector {
    Floating,
    Number(u64),
    UnknownHash,
}

fn selector(node: &Node, value: Option<&Value>) -> Selector {
    match BlockId::parse_optional(value) {
        Ok(BlockId::Tag(BlockTag::Number(number))) => Selector::Number(number),
        Ok(BlockId::Tag(BlockTag::Earliest)) => Selector::Number(0),
        Ok(BlockId::Hash(hash)) => match node.chain().block_by_hash(&hash) {
            Some(block) => Selector::Number(block.number()),
            None => Selector::UnknownHash,
        },
        // Malformed selectors stay local so the handler reports them.
        Ok(BlockId::Tag(_)) | Err(_) => Selector::Floating,
    }
}

/// Decides where `method` is answered. Runs under the engine lock; the
/// caller awaits the upstream part after releasing it.
pub(crate) fn plan_relay(node: &Node, method: &str, params: &Value) -> Relay {
    let (Some(client), Some(fork)) = (node.fork_client(), node.fork_info()) else {
        return Relay::Local;
    };
    let base = fork.block_number;
    let head = node.block_number();
    let items = params.as_array().map(Vec::as_slice).unwrap_or_default();
    let upstream = match method {
        "eth_getBlockByNumber"
        | "eth_getBlockByHash"
        | "eth_getBlockTransactionCountByNumber"
        | "eth_getBlockTransactionCountByHash"
        | "eth_getTransactionByBlockNumberAndIndex"
        | "eth_getTransactionByBlockHashAndIndex"
        | "eth_getBlockReceipts" => match selector(node, items.first()) {
            Selector::Number(number) => number <= base,
            Selector::UnknownHash => true,
            // The local copy of the fork block carries no transactions.
            Selector::Floating => head <= base,
        },
        "eth_getBalance" | "eth_getTransactionCount" | "eth_getCode" | "eth_call"
        | "eth_estimateGas" => historical_state(node, items.get(1), base, head),
        "eth_getStorageAt" => historical_state(node, items.get(2), base, head),
        "eth_getLogs" => return plan_logs(node, client, items.first(), base, head),
        _ => false,
    };
    if upstream {
        Relay::Upstream(client)
    } else {
        Relay::Local
    }
}

/// Reads at the head stay local so they observe cheatcode writes.
fn historical_state(node: &Node, value: Option<&Value>, base: u64, head: u64) -> bool {
    match selector(node, value) {
        Selector::Number(number) => number <= base && number != head,
        Selector::UnknownHash => true,
        Selector::Floating => false,
    }
}

fn plan_logs(node: &Node, client: ForkClient, filter: Option<&Value>, base: u64, head: u64) -> Relay {
    let Some(filter) = filter.and_then(Value::as_object) else {
        return Relay::Local;
    };
    if let Some(hash) = filter.get("blockHash") {
        return match selector(node, Some(hash)) {
            Selector::Number(number) if number > base => Relay::Local,
            Selector::Floating => Relay::Local,
            _ => Relay::Upstream(client),
        };
    }
    let bound = |key: &str| match selector(node, filter.get(key)) {
        Selector::Number(number) => Some(number),
        Selector::Floating => Some(head),
        Selector::UnknownHash => None,
    };
    let (Some(from), Some(to)) = (bound("fromBlock"), bound("toBlock")) else {
        return Relay::Local;
    };
    let to = to.min(head);
    if from > base || from > to {
        return Relay::Local;
    }
    let with_range = |from: u64, to: u64| {
        let mut filter = filter.clone();
        filter.insert("fromBlock".to_string(), quantity(from));
        filter.insert("toBlock".to_string(), quantity(to));
        Value::Array(vec![Value::Object(filter)])
    };
    if to <= base {
        return Relay::SplitLogs {
            client,
            upstream: with_range(from, to),
            local: None,
        };
    }
    Relay::SplitLogs {
        client,
        upstream: with_range(from, base),
        local: Some(with_range(base + 1, to)),
    }
}
