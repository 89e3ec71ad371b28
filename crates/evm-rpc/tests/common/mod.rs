//! evm-rpc integration test helpers: signed transactions, dev nodes and
//! request shorthands.

#![allow(dead_code)]

use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use evm_core::{MiningMode, Node, NodeConfig};
use evm_fork::ForkError;
use evm_rpc::{Dispatcher, RpcConfig};
use evm_rpc_types::{RpcErrorView, RpcRequest, RpcResponse};
use serde_json::{json, Value};

pub const CHAIN_ID: u64 = 31337;
pub const GWEI: u128 = 1_000_000_000;
pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const FORK_BLOCK: u64 = 16;

/// PUSH1 0 PUSH1 0 REVERT
pub const REVERT_CODE: [u8; 5] = [0x60, 0x00, 0x60, 0x00, 0xfd];
/// PUSH1 1 PUSH1 0 LOG0 STOP
pub const LOG_CODE: [u8; 6] = [0x60, 0x01, 0x60, 0x00, 0xa0, 0x00];
/// PUSH1 0x2a PUSH1 0 MSTORE PUSH1 0x20 PUSH1 0 RETURN
pub const RETURN_42_CODE: [u8; 10] = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

pub fn signer(seed: u8) -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).expect("signer")
}

pub fn recipient() -> Address {
    Address::from([0x11u8; 20])
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

/// Signed EIP-1559 call from `signer`, hex encoded for `eth_sendRawTransaction`.
pub fn raw_tx(signer: &PrivateKeySigner, nonce: u64, to: Address, input: &[u8]) -> String {
    let tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit: 100_000,
        max_fee_per_gas: 3 * GWEI,
        max_priority_fee_per_gas: GWEI,
        to: TxKind::Call(to),
        value: U256::ZERO,
        access_list: Default::default(),
        input: Bytes::copy_from_slice(input),
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).expect("sign");
    let signed = tx.into_signed(signature);
    format!("0x{}", hex::encode(signed.encoded_2718()))
}

/// Manual-mining dev config with each signer funded with 100 ether.
pub fn dev_config(seeds: &[u8]) -> NodeConfig {
    let mut config = NodeConfig {
        chain_id: CHAIN_ID,
        genesis_timestamp: Some(GENESIS_TIME),
        mining: MiningMode::Manual,
        ..Default::default()
    };
    for seed in seeds {
        config
            .genesis_accounts
            .insert(signer(*seed).address(), ether(100));
    }
    config
}

pub fn dev_node(seeds: &[u8]) -> Node {
    Node::new(dev_config(seeds)).expect("node")
}

pub fn dev_dispatcher(seeds: &[u8]) -> Dispatcher {
    Dispatcher::new(dev_node(seeds), RpcConfig::default())
}

pub async fn call(dispatcher: &Dispatcher, method: &str, params: Value) -> RpcResponse {
    dispatcher.handle(RpcRequest::new(1, method, params)).await
}

/// Result of a request expected to succeed.
pub async fn ok(dispatcher: &Dispatcher, method: &str, params: Value) -> Value {
    let response = call(dispatcher, method, params).await;
    match response.as_result() {
        Some(result) => result.clone(),
        None => panic!("{method} failed: {:?}", response.as_error()),
    }
}

/// Error of a request expected to fail.
pub async fn err(dispatcher: &Dispatcher, method: &str, params: Value) -> RpcErrorView {
    let response = call(dispatcher, method, params).await;
    match response.as_error() {
        Some(error) => error.clone(),
        None => panic!("{method} succeeded: {:?}", response.as_result()),
    }
}

pub async fn mine(dispatcher: &Dispatcher, blocks: u64) {
    ok(dispatcher, "anvil_mine", json!([format!("{blocks:#x}")])).await;
}

pub fn hex_quantity(value: &Value) -> u64 {
    let s = value.as_str().expect("quantity string");
    u64::from_str_radix(s.trim_start_matches("0x"), 16).expect("hex quantity")
}

/// Upstream chain for fork tests: block 16 at hash 0xabab.., a funded whale,
/// one log per block below the fork.
pub fn upstream(method: &str, params: &Value) -> Result<Value, ForkError> {
    match method {
        "eth_chainId" => Ok(json!(format!("{CHAIN_ID:#x}"))),
        "eth_blockNumber" => Ok(json!("0x20")),
        "eth_getBlockByNumber" => {
            let number = params[0].as_str().unwrap_or("0x10").to_string();
            Ok(json!({
                "number": number,
                "hash": format!("0x{}", "ab".repeat(32)),
                "parentHash": format!("0x{}", "cd".repeat(32)),
                "timestamp": format!("{GENESIS_TIME:#x}"),
                "gasLimit": "0x1c9c380",
                "gasUsed": "0xe4e1c0",
                "baseFeePerGas": "0x3b9aca00",
                "transactions": [],
            }))
        }
        "eth_getBalance" => Ok(json!("0x56bc75e2d63100000")),
        "eth_getTransactionCount" => Ok(json!("0x0")),
        "eth_getCode" => Ok(json!("0x")),
        "eth_getStorageAt" => Ok(json!(format!("0x{:064x}", 42))),
        "eth_getTransactionByHash" => Ok(json!({"hash": params[0], "blockNumber": "0x3"})),
        "eth_getLogs" => {
            let filter = &params[0];
            Ok(json!([{
                "address": format!("0x{}", "77".repeat(20)),
                "topics": [],
                "data": "0x",
                "blockNumber": filter["toBlock"],
                "blockHash": format!("0x{}", "ab".repeat(32)),
                "transactionHash": format!("0x{}", "99".repeat(32)),
                "transactionIndex": "0x0",
                "logIndex": "0x0",
                "removed": false,
            }]))
        }
        other => Err(ForkError::Rpc {
            code: -32601,
            message: format!("unexpected {other}"),
        }),
    }
}

pub fn fork_config() -> NodeConfig {
    let mut config = dev_config(&[]);
    config.fork = Some(evm_core::ForkConfig {
        url: "http://upstream.invalid".to_string(),
        block_number: Some(FORK_BLOCK),
        retries: 1,
        ..Default::default()
    });
    config
}
