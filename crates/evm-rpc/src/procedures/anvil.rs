//! `anvil_` test-node controls and their `evm_` counterparts.

use super::{quantity, to_json};
use crate::error::RpcError;
use crate::params::Params;
use alloy_primitives::{Address, Bytes, B256, U256};
use evm_core::{MiningMode, Node, NodeInfo};
use evm_db::StateDump;
use serde_json::{json, Value};
use tracing::info;

pub(super) async fn handle(node: &mut Node, method: &str, params: Params<'_>) -> Result<Value, RpcError> {
    match method {
        "anvil_setNextBlockTimestamp" | "evm_setNextBlockTimestamp" => {
            params.at_most(1)?;
            node.set_next_block_timestamp(params.quantity(0, "timestamp")?)?;
            Ok(Value::Null)
        }
        "anvil_setTime" => {
            params.at_most(1)?;
            Ok(json!(node.set_time(params.quantity(0, "timestamp")?)))
        }
        "anvil_increaseTime" | "evm_increaseTime" => {
            params.at_most(1)?;
            let offset = node.increase_time(params.quantity(0, "seconds")?);
            let offset = i64::try_from(offset)
                .map_err(|_| RpcError::Internal(format!("clock offset {offset} out of range")))?;
            Ok(json!(offset))
        }
        "anvil_setBlockTimestampInterval" => {
            params.at_most(1)?;
            node.set_block_timestamp_interval(Some(params.quantity(0, "interval")?));
            Ok(Value::Null)
        }
        "anvil_removeBlockTimestampInterval" => {
            let removed = node.block_timestamp_interval().is_some();
            node.set_block_timestamp_interval(None);
            Ok(Value::Bool(removed))
        }

        "anvil_mine" => {
            params.at_most(2)?;
            let blocks = params.optional_quantity(0, "blocks")?.unwrap_or(1);
            let interval = params.optional_quantity(1, "interval")?;
            let mined = node.mine(blocks, interval).await?;
            info!(blocks = mined.len(), head = node.block_number(), "rpc: mined on request");
            Ok(Value::Null)
        }
        "evm_mine" => {
            params.at_most(1)?;
            if let Some(timestamp) = params.optional_quantity(0, "timestamp")? {
                node.set_next_block_timestamp(timestamp)?;
            }
            node.mine(1, None).await?;
            Ok(Value::String("0x0".to_string()))
        }
        "anvil_setAutomine" | "evm_setAutomine" => {
            params.at_most(1)?;
            node.set_automine(params.required(0, "enabled")?);
            Ok(Value::Null)
        }
        "anvil_getAutomine" => Ok(Value::Bool(node.mining_mode() == MiningMode::Auto)),

        "anvil_setBalance" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            let balance: U256 = params.required(1, "balance")?;
            node.set_balance(address, balance).await?;
            Ok(Value::Null)
        }
        "anvil_setCode" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            let code: Bytes = params.required(1, "code")?;
            node.set_code(address, code).await?;
            Ok(Value::Null)
        }
        "anvil_setNonce" => {
            params.at_most(2)?;
            let address: Address = params.required(0, "address")?;
            node.set_nonce(address, params.quantity(1, "nonce")?).await?;
            Ok(Value::Null)
        }
        "anvil_setStorageAt" => {
            params.at_most(3)?;
            let address: Address = params.required(0, "address")?;
            let slot = params.slot(1)?;
            let value: B256 = params.required(2, "value")?;
            node.set_storage_at(address, slot, U256::from_be_bytes(value.0)).await?;
            Ok(Value::Bool(true))
        }
        "anvil_dumpState" => to_json(node.dump_state()),
        "anvil_loadState" => {
            params.at_most(1)?;
            let dump: StateDump = params.required(0, "state")?;
            node.load_state(dump);
            Ok(Value::Bool(true))
        }

        "anvil_impersonateAccount" => {
            params.at_most(1)?;
            node.impersonate_account(params.required(0, "address")?);
            Ok(Value::Null)
        }
        "anvil_stopImpersonatingAccount" => {
            params.at_most(1)?;
            node.stop_impersonating_account(params.required(0, "address")?);
            Ok(Value::Null)
        }
        "anvil_dropTransaction" => {
            params.at_most(1)?;
            let hash: B256 = params.required(0, "transaction hash")?;
            to_json(node.drop_transaction(&hash))
        }
        "anvil_dropAllTransactions" => {
            node.drop_all_transactions();
            Ok(Value::Null)
        }

        "anvil_snapshot" | "evm_snapshot" => Ok(quantity(node.snapshot()?)),
        "anvil_revert" | "evm_revert" => {
            params.at_most(1)?;
            let id = params.quantity(0, "snapshot id")?;
            Ok(Value::Bool(node.revert_to_snapshot(id)?))
        }
        "anvil_rollback" => {
            params.at_most(1)?;
            let depth = params.optional_quantity(0, "depth")?.unwrap_or(1);
            node.rollback(depth)?;
            Ok(Value::Null)
        }
        "anvil_nodeInfo" => Ok(node_info_json(&node.node_info())),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

fn node_info_json(info: &NodeInfo) -> Value {
    let mining = match info.mining {
        MiningMode::Auto => "auto",
        MiningMode::Manual => "manual",
    };
    let fork = info.fork.map(|fork| {
        json!({
            "forkBlockNumber": fork.block_number,
            "forkBlockHash": format!("{:#x}", fork.block_hash),
            "forkChainId": fork.chain_id,
        })
    });
    json!({
        "chainId": quantity(info.chain_id),
        "currentBlockNumber": quantity(info.block_number),
        "currentBlockHash": format!("{:#x}", info.block_hash),
        "currentBlockTimestamp": info.timestamp,
        "currentBaseFee": quantity(info.base_fee),
        "gasLimit": quantity(info.gas_limit),
        "miningMode": mining,
        "forkConfig": fork,
        "txpool": {
            "pending": info.pending,
            "queued": info.queued,
        },
    })
}
