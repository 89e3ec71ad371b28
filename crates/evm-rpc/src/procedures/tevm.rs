//! `tevm_` methods: calls and scripts that report failures in the result
//! body, and the account/state views keyed by address.

use super::{quantity, state_at, to_json};
use crate::error::RpcError;
use crate::params::Params;
use crate::views;
use alloy_primitives::{keccak256, Address, Bytes, U128, U256, U64};
use evm_core::{CallRequest, Node, NodeError};
use evm_rpc_types::{BlockId, TevmAccountView};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TevmCallParams {
    from: Option<Address>,
    to: Option<Address>,
    gas: Option<U64>,
    gas_price: Option<U128>,
    value: Option<U256>,
    data: Option<Bytes>,
    block_tag: Option<Value>,
}

impl TevmCallParams {
    fn call_request(&self) -> CallRequest {
        CallRequest {
            from: self.from,
            to: self.to,
            gas: self.gas.map(|gas| gas.to::<u64>()),
            gas_price: self.gas_price.map(|price| price.to::<u128>()),
            value: self.value.unwrap_or_default(),
            data: self.data.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TevmScriptParams {
    deployed_bytecode: Bytes,
    #[serde(flatten)]
    call: TevmCallParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TevmGetAccountParams {
    address: Address,
    #[serde(default)]
    return_storage: bool,
}

/// `tevm_loadState` accepts `{ state: {..} }` or the bare account map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TevmLoadStateParams {
    Wrapped { state: BTreeMap<Address, TevmAccountView> },
    Bare(BTreeMap<Address, TevmAccountView>),
}

pub(super) async fn handle(node: &mut Node, method: &str, params: Params<'_>) -> Result<Value, RpcError> {
    match method {
        "tevm_call" => {
            params.at_most(1)?;
            let call: TevmCallParams = params.optional(0, "call")?.unwrap_or_default();
            let id = BlockId::parse_optional(call.block_tag.as_ref()).map_err(RpcError::InvalidParams)?;
            let at = state_at(node, id)?;
            let outcome = node.call(call.call_request(), at).await?;
            to_json(views::call_result_view(&outcome))
        }
        "tevm_script" => {
            params.at_most(1)?;
            let script: TevmScriptParams = params.required(0, "script")?;
            let outcome = node
                .call_with_code(script.call.call_request(), script.deployed_bytecode)
                .await?;
            to_json(views::call_result_view(&outcome))
        }
        "tevm_dumpState" => {
            let mut result = Map::new();
            result.insert("state".to_string(), to_json(views::dump_to_tevm(&node.dump_state()))?);
            Ok(Value::Object(result))
        }
        "tevm_loadState" => {
            params.at_most(1)?;
            let accounts = match params.required::<TevmLoadStateParams>(0, "state")? {
                TevmLoadStateParams::Wrapped { state } => state,
                TevmLoadStateParams::Bare(state) => state,
            };
            node.load_state(views::tevm_to_dump(accounts));
            Ok(Value::Object(Map::new()))
        }
        "tevm_getAccount" => {
            params.at_most(1)?;
            let request: TevmGetAccountParams = params.required(0, "account")?;
            get_account(node, request).await
        }
        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

async fn get_account(node: &mut Node, request: TevmGetAccountParams) -> Result<Value, RpcError> {
    let address = request.address;
    let account = node
        .get_account(address, None)
        .await?
        .ok_or_else(|| NodeError::AccountNotFound(address.to_string()))?;
    let code = node.get_code(address, None).await?;
    let code_hash = if code.is_empty() {
        account.code_hash
    } else {
        keccak256(&code)
    };
    let mut result = json!({
        "address": address.to_string(),
        "nonce": quantity(account.nonce),
        "balance": to_json(account.balance)?,
        "deployedBytecode": to_json(&code)?,
        "codeHash": format!("{code_hash:#x}"),
        "isContract": !code.is_empty(),
        "isEmpty": account.is_empty(),
    });
    if request.return_storage {
        let storage = node
            .dump_state()
            .accounts
            .remove(&address)
            .map(|dumped| dumped.storage)
            .unwrap_or_default();
        result["storage"] = to_json(storage)?;
    }
    Ok(result)
}
