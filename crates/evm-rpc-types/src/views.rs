//! Wire shapes of blocks, transactions, receipts, logs and call objects.

use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U128, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EthTxListView {
    Full(Vec<EthTxView>),
    Hashes(Vec<B256>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthBlockView {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub nonce: B64,
    pub sha3_uncles: B256,
    pub logs_bloom: Bloom,
    pub transactions_root: B256,
    pub state_root: B256,
    pub receipts_root: B256,
    pub miner: Address,
    pub difficulty: U256,
    pub total_difficulty: U256,
    pub extra_data: Bytes,
    pub size: U64,
    pub gas_limit: U64,
    pub gas_used: U64,
    pub timestamp: U64,
    pub mix_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U64>,
    pub transactions: EthTxListView,
    pub uncles: Vec<B256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccessListItemView {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTxView {
    pub hash: B256,
    pub nonce: U64,
    pub block_hash: Option<B256>,
    pub block_number: Option<U64>,
    pub transaction_index: Option<U64>,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: U128,
    pub gas: U64,
    pub input: Bytes,
    #[serde(rename = "type")]
    pub tx_type: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<RpcAccessListItemView>>,
    pub v: U64,
    pub r: U256,
    pub s: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthLogView {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: U64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub log_index: U64,
    pub removed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthReceiptView {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub from: Address,
    pub to: Option<Address>,
    pub cumulative_gas_used: U64,
    pub gas_used: U64,
    pub effective_gas_price: U128,
    pub contract_address: Option<Address>,
    pub logs: Vec<EthLogView>,
    pub logs_bloom: Bloom,
    #[serde(rename = "type")]
    pub tx_type: U64,
    pub status: U64,
}

/// `eth_call` / `eth_estimateGas` / `eth_sendTransaction` argument.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RpcCallObjectView {
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub gas: Option<U64>,
    #[serde(default)]
    pub gas_price: Option<U128>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U128>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U128>,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub data: Option<Bytes>,
    #[serde(default)]
    pub input: Option<Bytes>,
    #[serde(default)]
    pub nonce: Option<U64>,
    #[serde(default)]
    pub chain_id: Option<U64>,
    #[serde(default, rename = "type")]
    pub tx_type: Option<U64>,
    #[serde(default)]
    pub access_list: Option<Vec<RpcAccessListItemView>>,
}

impl RpcCallObjectView {
    /// `input` wins over the legacy `data` field.
    pub fn calldata(&self) -> Bytes {
        self.input
            .clone()
            .or_else(|| self.data.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item.clone()],
            OneOrMany::Many(items) => items.clone(),
        }
    }
}

/// `eth_newFilter` / `eth_getLogs` argument. Block bounds stay raw so the
/// caller can resolve tags against its own head.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLogFilterView {
    #[serde(default)]
    pub from_block: Option<Value>,
    #[serde(default)]
    pub to_block: Option<Value>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub address: Option<OneOrMany<Address>>,
    #[serde(default)]
    pub topics: Option<Vec<Option<OneOrMany<B256>>>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TevmAccountView {
    pub nonce: U64,
    pub balance: U256,
    pub deployed_bytecode: Bytes,
    pub storage: std::collections::BTreeMap<B256, U256>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TevmCallResultView {
    pub raw_data: Bytes,
    pub execution_gas_used: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
    pub logs: Vec<TevmLogView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TevmLogView {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_object_accepts_input_or_data() {
        let call: RpcCallObjectView =
            serde_json::from_value(json!({"to": "0x1111111111111111111111111111111111111111", "data": "0x01"}))
                .expect("parse");
        assert_eq!(call.calldata(), Bytes::from_static(&[1]));
        let both: RpcCallObjectView =
            serde_json::from_value(json!({"input": "0x02", "data": "0x01"})).expect("parse");
        assert_eq!(both.calldata(), Bytes::from_static(&[2]));
    }

    #[test]
    fn call_object_rejects_unknown_fields() {
        let parsed: Result<RpcCallObjectView, _> =
            serde_json::from_value(json!({"too": "0x01"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn filter_address_accepts_one_or_many() {
        let one: RpcLogFilterView = serde_json::from_value(
            json!({"address": "0x1111111111111111111111111111111111111111"}),
        )
        .expect("parse");
        assert_eq!(one.address.map(|a| a.to_vec().len()), Some(1));
        let many: RpcLogFilterView = serde_json::from_value(json!({
            "address": ["0x1111111111111111111111111111111111111111", "0x2222222222222222222222222222222222222222"],
            "topics": [null, ["0x0000000000000000000000000000000000000000000000000000000000000001"]]
        }))
        .expect("parse");
        assert_eq!(many.address.map(|a| a.to_vec().len()), Some(2));
        assert_eq!(many.topics.map(|t| t.len()), Some(2));
    }
}
