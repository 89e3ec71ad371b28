//! Envelope handling, routing and the eth_/anvil_/tevm_ method families.

mod common;

use alloy_primitives::Address;
use common::{
    call, dev_dispatcher, err, hex_quantity, mine, ok, raw_tx, recipient, signer, CHAIN_ID,
    GENESIS_TIME, RETURN_42_CODE, REVERT_CODE,
};
use evm_rpc_types::{
    RpcRequest, CODE_ACCOUNT_NOT_FOUND, CODE_EXECUTION_REVERTED, CODE_INVALID_PARAMS,
    CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND, CODE_PARSE_ERROR, CODE_SNAPSHOT_NOT_FOUND,
};
use serde_json::{json, Value};

fn contract() -> Address {
    Address::from([0xc0u8; 20])
}

fn word(value: u8) -> String {
    format!("0x{}{value:02x}", "00".repeat(31))
}

#[tokio::test]
async fn batch_keeps_order_ids_and_independent_failures() {
    let dispatcher = dev_dispatcher(&[]);
    let responses = dispatcher
        .handle_value(json!([
            {"jsonrpc": "2.0", "id": "a", "method": "eth_chainId"},
            {"jsonrpc": "2.0", "id": 2, "method": "nope_method"},
            {"jsonrpc": "2.0", "method": "eth_blockNumber"},
            {"jsonrpc": "2.0", "id": 4, "params": []},
        ]))
        .await;
    let responses = responses.as_array().expect("batch response");
    assert_eq!(responses.len(), 4);

    assert_eq!(responses[0]["id"], "a");
    assert_eq!(responses[0]["result"], format!("{CHAIN_ID:#x}"));
    assert_eq!(responses[1]["id"], 2);
    assert_eq!(responses[1]["error"]["code"], CODE_METHOD_NOT_FOUND);
    assert!(responses[2].get("id").is_none());
    assert_eq!(responses[2]["result"], "0x0");
    assert_eq!(responses[3]["id"], 4);
    assert_eq!(responses[3]["error"]["code"], CODE_INVALID_REQUEST);
}

#[tokio::test]
async fn bulk_requests_answer_in_order() {
    let dispatcher = dev_dispatcher(&[]);
    let responses = dispatcher
        .handle_bulk(vec![
            RpcRequest::new(1, "eth_blockNumber", json!([])),
            RpcRequest::new(2, "eth_getBalance", json!(["not an address"])),
            RpcRequest::new(3, "net_version", json!([])),
        ])
        .await;
    let ids: Vec<Value> = responses.iter().filter_map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    assert!(responses[0].as_result().is_some());
    assert_eq!(
        responses[1].as_error().map(|e| e.code),
        Some(CODE_INVALID_PARAMS)
    );
    assert_eq!(responses[2].as_result(), Some(&json!(CHAIN_ID.to_string())));
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let dispatcher = dev_dispatcher(&[]);
    let parsed: Value =
        serde_json::from_str(&dispatcher.handle_json("{not json").await).expect("json");
    assert_eq!(parsed["error"]["code"], CODE_PARSE_ERROR);
    assert!(parsed.get("id").is_none());

    let empty = dispatcher.handle_value(json!([])).await;
    assert_eq!(empty["error"]["code"], CODE_INVALID_REQUEST);

    let mut request = RpcRequest::new(9, "eth_chainId", json!([]));
    request.jsonrpc = Some("1.0".to_string());
    let response = dispatcher.handle(request).await;
    assert_eq!(response.id, Some(json!(9)));
    assert_eq!(response.as_error().map(|e| e.code), Some(CODE_INVALID_REQUEST));

    let named = err(&dispatcher, "eth_getBalance", json!({"address": "0x00"})).await;
    assert_eq!(named.code, CODE_INVALID_PARAMS);
}

#[tokio::test]
async fn unknown_methods_name_themselves() {
    let dispatcher = dev_dispatcher(&[]);
    let error = err(&dispatcher, "eth_fooBar", json!([])).await;
    assert_eq!(error.code, CODE_METHOD_NOT_FOUND);
    assert!(error.message.contains("eth_fooBar"));
}

#[tokio::test]
async fn invalid_params_do_not_touch_state() {
    let dispatcher = dev_dispatcher(&[]);
    let error = err(&dispatcher, "anvil_setBalance", json!([recipient(), "lots"])).await;
    assert_eq!(error.code, CODE_INVALID_PARAMS);
    let balance = ok(&dispatcher, "eth_getBalance", json!([recipient(), "latest"])).await;
    assert_eq!(balance, "0x0");

    let error = err(
        &dispatcher,
        "eth_getBalance",
        json!([recipient(), "latest", "extra"]),
    )
    .await;
    assert_eq!(error.code, CODE_INVALID_PARAMS);
}

#[tokio::test]
async fn client_metadata_methods() {
    let dispatcher = dev_dispatcher(&[]);
    let version = ok(&dispatcher, "web3_clientVersion", json!([])).await;
    assert!(version.as_str().expect("string").starts_with("evm-rpc/"));
    assert_eq!(ok(&dispatcher, "eth_syncing", json!([])).await, false);
    assert_eq!(ok(&dispatcher, "eth_accounts", json!([])).await, json!([]));
    let price = hex_quantity(&ok(&dispatcher, "eth_gasPrice", json!([])).await);
    assert!(price > 1_000_000_000);
}

#[tokio::test]
async fn hardhat_ganache_and_tevm_names_reach_anvil() {
    let dispatcher = dev_dispatcher(&[]);
    ok(&dispatcher, "hardhat_setBalance", json!([recipient(), "0x5"])).await;
    assert_eq!(
        ok(&dispatcher, "eth_getBalance", json!([recipient(), "latest"])).await,
        "0x5"
    );
    ok(&dispatcher, "tevm_setNonce", json!([recipient(), "0x3"])).await;
    assert_eq!(
        ok(&dispatcher, "eth_getTransactionCount", json!([recipient()])).await,
        "0x3"
    );
    ok(&dispatcher, "ganache_mine", json!([])).await;
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x1");
}

#[tokio::test]
async fn reverting_calls_return_code_three_with_data() {
    let dispatcher = dev_dispatcher(&[]);
    let code = format!("0x{}", hex::encode(REVERT_CODE));
    ok(&dispatcher, "anvil_setCode", json!([contract(), code])).await;
    let error = err(&dispatcher, "eth_call", json!([{"to": contract()}, "latest"])).await;
    assert_eq!(error.code, CODE_EXECUTION_REVERTED);
    assert_eq!(error.message, "execution reverted");
    assert_eq!(error.data, Some(json!("0x")));
}

#[tokio::test]
async fn successful_calls_return_output() {
    let dispatcher = dev_dispatcher(&[]);
    let code = format!("0x{}", hex::encode(RETURN_42_CODE));
    ok(&dispatcher, "anvil_setCode", json!([contract(), code])).await;
    let output = ok(&dispatcher, "eth_call", json!([{"to": contract()}])).await;
    assert_eq!(output, word(0x2a));
    let gas = hex_quantity(&ok(&dispatcher, "eth_estimateGas", json!([{"to": contract()}])).await);
    assert!(gas >= 21_000);
}

#[tokio::test]
async fn transactions_move_from_pool_to_block() {
    let alice = signer(1);
    let dispatcher = dev_dispatcher(&[1]);
    let raw = raw_tx(&alice, 0, recipient(), &[]);
    let hash = ok(&dispatcher, "eth_sendRawTransaction", json!([raw])).await;

    let pending = ok(&dispatcher, "eth_getTransactionByHash", json!([hash])).await;
    assert_eq!(pending["hash"], hash);
    assert_eq!(pending["blockNumber"], Value::Null);
    let status = ok(&dispatcher, "txpool_status", json!([])).await;
    assert_eq!(status, json!({"pending": "0x1", "queued": "0x0"}));
    let content = ok(&dispatcher, "txpool_content", json!([])).await;
    assert_eq!(content["pending"][alice.address().to_string()]["0"]["hash"], hash);
    assert_eq!(
        ok(&dispatcher, "eth_getTransactionCount", json!([alice.address(), "pending"])).await,
        "0x1"
    );
    assert_eq!(
        ok(&dispatcher, "eth_getTransactionCount", json!([alice.address(), "latest"])).await,
        "0x0"
    );
    assert_eq!(
        ok(&dispatcher, "eth_getTransactionReceipt", json!([hash])).await,
        Value::Null
    );

    mine(&dispatcher, 1).await;
    let receipt = ok(&dispatcher, "eth_getTransactionReceipt", json!([hash])).await;
    assert_eq!(receipt["status"], "0x1");
    assert_eq!(receipt["blockNumber"], "0x1");
    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["0x1", false])).await;
    assert_eq!(block["transactions"], json!([hash]));
    let full = ok(&dispatcher, "eth_getBlockByHash", json!([block["hash"], true])).await;
    assert_eq!(full["transactions"][0]["hash"], hash);
    assert_eq!(
        ok(&dispatcher, "eth_getBlockTransactionCountByNumber", json!(["0x1"])).await,
        "0x1"
    );
    let by_index = ok(
        &dispatcher,
        "eth_getTransactionByBlockNumberAndIndex",
        json!(["0x1", "0x0"]),
    )
    .await;
    assert_eq!(by_index["blockNumber"], "0x1");
    assert_eq!(
        ok(&dispatcher, "eth_getBlockByNumber", json!(["0x9", false])).await,
        Value::Null
    );
}

#[tokio::test]
async fn impersonated_senders_may_send_unsigned_transactions() {
    let dispatcher = dev_dispatcher(&[]);
    let sender = Address::from([0x55u8; 20]);
    ok(&dispatcher, "anvil_setBalance", json!([sender, "0xde0b6b3a7640000"])).await;
    ok(&dispatcher, "anvil_impersonateAccount", json!([sender])).await;
    let hash = ok(
        &dispatcher,
        "eth_sendTransaction",
        json!([{"from": sender, "to": recipient(), "value": "0x1"}]),
    )
    .await;
    mine(&dispatcher, 1).await;
    let receipt = ok(&dispatcher, "eth_getTransactionReceipt", json!([hash])).await;
    assert_eq!(receipt["from"], json!(sender));
    ok(&dispatcher, "anvil_stopImpersonatingAccount", json!([sender])).await;
    let error = err(
        &dispatcher,
        "eth_sendTransaction",
        json!([{"from": sender, "to": recipient()}]),
    )
    .await;
    assert_ne!(error.code, CODE_METHOD_NOT_FOUND);
}

#[tokio::test]
async fn snapshots_rewind_and_are_consumed() {
    let dispatcher = dev_dispatcher(&[]);
    let id = ok(&dispatcher, "evm_snapshot", json!([])).await;
    assert_eq!(id, "0x1");
    ok(&dispatcher, "anvil_setBalance", json!([recipient(), "0x9"])).await;
    mine(&dispatcher, 2).await;

    assert_eq!(ok(&dispatcher, "evm_revert", json!([id])).await, true);
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x0");
    assert_eq!(
        ok(&dispatcher, "eth_getBalance", json!([recipient()])).await,
        "0x0"
    );
    let error = err(&dispatcher, "evm_revert", json!([id])).await;
    assert_eq!(error.code, CODE_SNAPSHOT_NOT_FOUND);
}

#[tokio::test]
async fn timestamps_follow_time_controls() {
    let dispatcher = dev_dispatcher(&[]);
    let target = GENESIS_TIME + 100;
    assert_eq!(ok(&dispatcher, "evm_mine", json!([target])).await, "0x0");
    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["latest", false])).await;
    assert_eq!(hex_quantity(&block["timestamp"]), target);

    let error = err(&dispatcher, "anvil_setNextBlockTimestamp", json!([GENESIS_TIME])).await;
    assert_eq!(error.code, CODE_INVALID_PARAMS);

    ok(&dispatcher, "anvil_setNextBlockTimestamp", json!([target + 50])).await;
    mine(&dispatcher, 1).await;
    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["latest", false])).await;
    assert_eq!(hex_quantity(&block["timestamp"]), target + 50);

    ok(&dispatcher, "anvil_setBlockTimestampInterval", json!([10])).await;
    mine(&dispatcher, 1).await;
    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["latest", false])).await;
    assert_eq!(hex_quantity(&block["timestamp"]), target + 60);
    assert_eq!(
        ok(&dispatcher, "anvil_removeBlockTimestampInterval", json!([])).await,
        true
    );
}

#[tokio::test]
async fn mining_zero_blocks_leaves_the_head_alone() {
    let dispatcher = dev_dispatcher(&[]);
    ok(&dispatcher, "anvil_mine", json!(["0x0"])).await;
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x0");
    ok(&dispatcher, "anvil_mine", json!([])).await;
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x1");
}

#[tokio::test]
async fn automine_can_be_toggled() {
    let dispatcher = dev_dispatcher(&[1]);
    assert_eq!(ok(&dispatcher, "anvil_getAutomine", json!([])).await, false);
    ok(&dispatcher, "evm_setAutomine", json!([true])).await;
    assert_eq!(ok(&dispatcher, "anvil_getAutomine", json!([])).await, true);
    let raw = raw_tx(&signer(1), 0, recipient(), &[]);
    ok(&dispatcher, "eth_sendRawTransaction", json!([raw])).await;
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x1");
}

#[tokio::test]
async fn rollback_returns_transactions_to_the_pool() {
    let alice = signer(1);
    let dispatcher = dev_dispatcher(&[1]);
    let hash = ok(
        &dispatcher,
        "eth_sendRawTransaction",
        json!([raw_tx(&alice, 0, recipient(), &[])]),
    )
    .await;
    mine(&dispatcher, 1).await;
    ok(&dispatcher, "anvil_rollback", json!([])).await;
    assert_eq!(ok(&dispatcher, "eth_blockNumber", json!([])).await, "0x0");
    let status = ok(&dispatcher, "txpool_status", json!([])).await;
    assert_eq!(status["pending"], "0x1");
    assert_eq!(ok(&dispatcher, "anvil_dropTransaction", json!([hash])).await, hash);
    assert_eq!(
        ok(&dispatcher, "anvil_dropTransaction", json!([hash])).await,
        Value::Null
    );
}

#[tokio::test]
async fn storage_cheatcodes_accept_short_slots() {
    let dispatcher = dev_dispatcher(&[]);
    let set = ok(
        &dispatcher,
        "anvil_setStorageAt",
        json!([contract(), "0x1", word(7)]),
    )
    .await;
    assert_eq!(set, true);
    assert_eq!(
        ok(&dispatcher, "eth_getStorageAt", json!([contract(), word(1), "latest"])).await,
        word(7)
    );
}

#[tokio::test]
async fn anvil_state_dumps_load_into_a_fresh_node() {
    let source = dev_dispatcher(&[]);
    ok(&source, "anvil_setBalance", json!([recipient(), "0x64"])).await;
    let dump = ok(&source, "anvil_dumpState", json!([])).await;

    let target = dev_dispatcher(&[]);
    assert_eq!(ok(&target, "anvil_loadState", json!([dump])).await, true);
    assert_eq!(
        ok(&target, "eth_getBalance", json!([recipient()])).await,
        "0x64"
    );
}

#[tokio::test]
async fn node_info_reports_chain_and_mining() {
    let dispatcher = dev_dispatcher(&[]);
    let info = ok(&dispatcher, "anvil_nodeInfo", json!([])).await;
    assert_eq!(info["chainId"], format!("{CHAIN_ID:#x}"));
    assert_eq!(info["currentBlockNumber"], "0x0");
    assert_eq!(info["miningMode"], "manual");
    assert_eq!(info["forkConfig"], Value::Null);
}

#[tokio::test]
async fn tevm_calls_report_failures_in_the_result() {
    let dispatcher = dev_dispatcher(&[]);
    let code = format!("0x{}", hex::encode(REVERT_CODE));
    ok(&dispatcher, "anvil_setCode", json!([contract(), code])).await;
    let result = ok(&dispatcher, "tevm_call", json!([{"to": contract()}])).await;
    assert_eq!(result["errors"], json!(["execution reverted"]));

    let script = ok(
        &dispatcher,
        "tevm_script",
        json!([{"deployedBytecode": format!("0x{}", hex::encode(RETURN_42_CODE)), "data": "0x"}]),
    )
    .await;
    assert_eq!(script["rawData"], word(0x2a));
    assert!(script.get("errors").is_none());
}

#[tokio::test]
async fn tevm_state_views_use_hex_quantities() {
    let dispatcher = dev_dispatcher(&[]);
    ok(&dispatcher, "anvil_setNonce", json!([recipient(), "0xa"])).await;
    ok(&dispatcher, "anvil_setBalance", json!([recipient(), "0x5"])).await;

    let dump = ok(&dispatcher, "tevm_dumpState", json!([])).await;
    let account = dump["state"]
        .as_object()
        .and_then(|accounts| {
            accounts
                .iter()
                .find(|(address, _)| address.eq_ignore_ascii_case(&recipient().to_string()))
        })
        .map(|(_, account)| account.clone())
        .expect("dumped account");
    assert_eq!(account["nonce"], "0xa");
    assert_eq!(account["balance"], "0x5");

    let fetched = ok(&dispatcher, "tevm_getAccount", json!([{"address": recipient()}])).await;
    assert_eq!(fetched["nonce"], "0xa");
    assert_eq!(fetched["isContract"], false);

    let missing = err(
        &dispatcher,
        "tevm_getAccount",
        json!([{"address": Address::from([0xeeu8; 20])}]),
    )
    .await;
    assert_eq!(missing.code, CODE_ACCOUNT_NOT_FOUND);

    let fresh = dev_dispatcher(&[]);
    assert_eq!(ok(&fresh, "tevm_loadState", json!([dump])).await, json!({}));
    assert_eq!(
        ok(&fresh, "eth_getTransactionCount", json!([recipient()])).await,
        "0xa"
    );
}

#[tokio::test]
async fn notifications_get_responses_without_ids() {
    let dispatcher = dev_dispatcher(&[]);
    let response = dispatcher
        .handle(RpcRequest::notification("eth_chainId", json!([])))
        .await;
    let value = serde_json::to_value(&response).expect("serialize");
    assert!(value.get("id").is_none());
    assert_eq!(value["result"], format!("{CHAIN_ID:#x}"));
    let explicit_null = call(&dispatcher, "eth_chainId", json!([])).await;
    assert_eq!(explicit_null.id, Some(json!(1)));
}
