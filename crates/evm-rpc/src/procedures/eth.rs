//! `eth_`, `net_`, `web3_` and `txpool_` methods.

use super::{block_by_id, filter_bound, quantity, state_at, to_json, Engine};
use crate::error::RpcError;
use crate::filters::{FilterChanges, FilterKind, LogCriteria};
use crate::params::Params;
use crate::views;
use alloy_primitives::{Address, Bytes, B256, U128};
use evm_core::{execution_error, Node};
use evm_rpc_types::{BlockId, BlockTag, RpcCallObjectView, RpcLogFilterView};
use evm_tx::SignedTx;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

const CLIENT_VERSION: &str = concat!("evm-rpc/", env!("CARGO_PKG_VERSION"));

pub(super) async fn handle(engine: &mut Engine, method: &str, params: Params<'_>) -> Result<Value, RpcError> {
    let Engine { node, filters, .. } = engine;
    match method {
        "eth_chainId" => Ok(quantity(node.chain_id())),
        "net_version" => Ok(Value::String(node.chain_id().to_string())),
        "web3_clientVersion" => Ok(Value::String(CLIENT_VERSION.to_string())),
        "eth_blockNumber" => Ok(quantity(node.block_number())),
        "eth_gasPrice" => to_json(U128::from(node.gas_price())),
        "eth_maxPriorityFeePerGas" => {
            let tip = node.gas_price().saturating_sub(u128::from(node.base_fee()));
            to_json(U128::from(tip))
        }
        "eth_accounts" => Ok(Value::Array(Vec::new())),
        "eth_syncing" => Ok(Value::Bool(false)),

        "eth_getBalance" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            let at = state_at(node, params.block(1)?)?;
            to_json(node.get_balance(address, at).await?)
        }
        "eth_getTransactionCount" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            let id = params.block(1)?;
            if id == BlockId::Tag(BlockTag::Pending) {
                let state_nonce = node.get_nonce(address, None).await?;
                return Ok(quantity(node.pool().next_nonce(&address, state_nonce)));
            }
            let at = state_at(node, id)?;
            Ok(quantity(node.get_nonce(address, at).await?))
        }
        "eth_getCode" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            let at = state_at(node, params.block(1)?)?;
            to_json(node.get_code(address, at).await?)
        }
        "eth_getStorageAt" => {
            params.at_most(3)?;
            let address: Address = params.required(0, "address")?;
            let slot = params.slot(1)?;
            let at = state_at(node, params.block(2)?)?;
            let value = node.get_storage_at(address, slot, at).await?;
            to_json(B256::from(value))
        }

        "eth_call" => {
            let call: RpcCallObjectView = params.required(0, "call object")?;
            let at = state_at(node, params.block(1)?)?;
            let outcome = node.call(views::call_request(&call), at).await?;
            if !outcome.success {
                return Err(execution_error(&outcome).into());
            }
            to_json(outcome.output)
        }
        "eth_estimateGas" => {
            let call: RpcCallObjectView = params.required(0, "call object")?;
            let at = state_at(node, params.block(1)?)?;
            Ok(quantity(node.estimate_gas(views::call_request(&call), at).await?))
        }
        "eth_sendRawTransaction" => {
            params.at_most(1)?;
            let raw: Bytes = params.required(0, "raw transaction")?;
            to_json(node.send_raw_transaction(&raw).await?)
        }
        "eth_sendTransaction" => {
            params.at_most(1)?;
            let call: RpcCallObjectView = params.required(0, "transaction")?;
            to_json(node.send_transaction(views::send_request(&call)).await?)
        }

        "eth_getBlockByNumber" | "eth_getBlockByHash" => {
            params.at_most(2)?;
            let id = if method == "eth_getBlockByHash" {
                BlockId::Hash(params.required(0, "block hash")?)
            } else {
                params.block(0)?
            };
            let full = params.optional::<bool>(1, "full transactions")?.unwrap_or(false);
            to_json(block_by_id(node, id).map(|block| views::block_to_eth_view(block, full)))
        }
        "eth_getBlockTransactionCountByNumber" | "eth_getBlockTransactionCountByHash" => {
            params.at_most(1)?;
            let id = if method == "eth_getBlockTransactionCountByHash" {
                BlockId::Hash(params.required(0, "block hash")?)
            } else {
                params.block(0)?
            };
            Ok(block_by_id(node, id)
                .map(|block| quantity(block.transactions.len() as u64))
                .unwrap_or(Value::Null))
        }
        "eth_getTransactionByBlockNumberAndIndex" | "eth_getTransactionByBlockHashAndIndex" => {
            params.at_most(2)?;
            let id = if method == "eth_getTransactionByBlockHashAndIndex" {
                BlockId::Hash(params.required(0, "block hash")?)
            } else {
                params.block(0)?
            };
            let index = params.quantity(1, "index")?;
            let Some(block) = block_by_id(node, id) else {
                return Ok(Value::Null);
            };
            let hash = usize::try_from(index)
                .ok()
                .and_then(|index| block.transactions.get(index))
                .map(SignedTx::hash);
            match hash {
                Some(hash) => transaction_by_hash(node, &hash),
                None => Ok(Value::Null),
            }
        }
        "eth_getTransactionByHash" => {
            params.at_most(1)?;
            let hash: B256 = params.required(0, "transaction hash")?;
            transaction_by_hash(node, &hash)
        }
        "eth_getTransactionReceipt" => {
            params.at_most(1)?;
            let hash: B256 = params.required(0, "transaction hash")?;
            to_json(node.chain().receipt(&hash).map(views::receipt_to_eth_view))
        }
        "eth_getBlockReceipts" => {
            params.at_most(1)?;
            let Some(block) = block_by_id(node, params.block(0)?) else {
                return Ok(Value::Null);
            };
            let receipts: Vec<_> = node
                .chain()
                .block_receipts(block)
                .into_iter()
                .map(views::receipt_to_eth_view)
                .collect();
            to_json(receipts)
        }

        "eth_getLogs" => {
            params.at_most(1)?;
            let view: RpcLogFilterView = params.required(0, "filter")?;
            let Some((from, to)) = log_range(node, &view)? else {
                return Ok(Value::Array(Vec::new()));
            };
            logs_json(&node.logs(&views::log_filter(&view, from, to)))
        }
        "eth_newFilter" => {
            params.at_most(1)?;
            let view: RpcLogFilterView = params.required(0, "filter")?;
            if view.block_hash.is_some() {
                return Err(RpcError::InvalidParams(
                    "blockHash is not supported by eth_newFilter".to_string(),
                ));
            }
            let criteria = LogCriteria {
                from_block: filter_bound(node, view.from_block.as_ref())?,
                to_block: filter_bound(node, view.to_block.as_ref())?,
                predicate: views::log_filter(&view, 0, 0),
            };
            let id = filters.install(FilterKind::Logs(criteria), node.block_number(), Instant::now());
            Ok(Value::String(id))
        }
        "eth_newBlockFilter" => {
            let id = filters.install(FilterKind::Blocks, node.block_number(), Instant::now());
            Ok(Value::String(id))
        }
        "eth_newPendingTransactionFilter" => {
            let events = node.subscribe_pool();
            let id = filters.install(
                FilterKind::PendingTransactions(events),
                node.block_number(),
                Instant::now(),
            );
            Ok(Value::String(id))
        }
        "eth_getFilterChanges" => {
            params.at_most(1)?;
            let id: String = params.required(0, "filter id")?;
            match filters.poll(&id, node, Instant::now())? {
                FilterChanges::Logs(logs) => logs_json(&logs),
                FilterChanges::Hashes(hashes) => to_json(hashes),
            }
        }
        "eth_getFilterLogs" => {
            params.at_most(1)?;
            let id: String = params.required(0, "filter id")?;
            logs_json(&filters.filter_logs(&id, node, Instant::now())?)
        }
        "eth_uninstallFilter" => {
            params.at_most(1)?;
            let id: String = params.required(0, "filter id")?;
            Ok(Value::Bool(filters.uninstall(&id)))
        }

        "txpool_content" => {
            let content = node.pool().content();
            let mut result = Map::new();
            result.insert("pending".to_string(), pool_section(&content.pending)?);
            result.insert("queued".to_string(), pool_section(&content.queued)?);
            Ok(Value::Object(result))
        }
        "txpool_status" => {
            let pool = node.pool();
            let mut result = Map::new();
            result.insert("pending".to_string(), quantity(pool.pending_count() as u64));
            result.insert("queued".to_string(), quantity(pool.queued_count() as u64));
            Ok(Value::Object(result))
        }

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

/// Mined transactions first, then the pool; `null` when neither knows it.
fn transaction_by_hash(node: &Node, hash: &B256) -> Result<Value, RpcError> {
    let chain = node.chain();
    if let Some((tx, location)) = chain.transaction(hash) {
        let base_fee = chain
            .block_by_number(location.block_number)
            .and_then(|block| block.header.base_fee_per_gas);
        return to_json(views::tx_to_eth_view(tx, Some(location), base_fee));
    }
    to_json(node.pool().get(hash).map(|tx| views::tx_to_eth_view(tx, None, None)))
}

/// Block range of an `eth_getLogs` filter, clamped to the head. `None` when
/// the range is empty or names an unknown block hash.
fn log_range(node: &Node, view: &RpcLogFilterView) -> Result<Option<(u64, u64)>, RpcError> {
    if let Some(hash) = view.block_hash {
        return Ok(node
            .chain()
            .block_by_hash(&hash)
            .map(|block| (block.number(), block.number())));
    }
    let head = node.block_number();
    let from = filter_bound(node, view.from_block.as_ref())?.unwrap_or(head);
    let to = filter_bound(node, view.to_block.as_ref())?
        .unwrap_or(head)
        .min(head);
    Ok((from <= to).then_some((from, to)))
}

fn logs_json(logs: &[evm_core::LogRecord]) -> Result<Value, RpcError> {
    to_json(logs.iter().map(views::log_to_eth_view).collect::<Vec<_>>())
}

fn pool_section(section: &BTreeMap<Address, BTreeMap<u64, SignedTx>>) -> Result<Value, RpcError> {
    let mut by_sender = Map::new();
    for (sender, txs) in section {
        let mut by_nonce = Map::new();
        for (nonce, tx) in txs {
            by_nonce.insert(nonce.to_string(), to_json(views::tx_to_eth_view(tx, None, None))?);
        }
        by_sender.insert(sender.to_string(), Value::Object(by_nonce));
    }
    Ok(Value::Object(by_sender))
}
