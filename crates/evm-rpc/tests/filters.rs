mod common;

use alloy_primitives::Address;
use common::{dev_dispatcher, err, mine, ok, raw_tx, recipient, signer, LOG_CODE};
use evm_rpc_types::CODE_FILTER_NOT_FOUND;
use serde_json::{json, Value};

fn emitter() -> Address {
    Address::from([0xe1u8; 20])
}

#[tokio::test]
async fn uninstall_reports_whether_the_filter_existed() {
    let dispatcher = dev_dispatcher(&[]);
    let id = ok(&dispatcher, "eth_newBlockFilter", json!([])).await;
    assert!(id.as_str().expect("id").starts_with("0x"));
    assert_eq!(ok(&dispatcher, "eth_uninstallFilter", json!([id])).await, true);
    assert_eq!(ok(&dispatcher, "eth_uninstallFilter", json!([id])).await, false);

    let error = err(&dispatcher, "eth_getFilterChanges", json!([id])).await;
    assert_eq!(error.code, CODE_FILTER_NOT_FOUND);
}

#[tokio::test]
async fn block_filters_report_each_block_once() {
    let dispatcher = dev_dispatcher(&[]);
    let id = ok(&dispatcher, "eth_newBlockFilter", json!([])).await;
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([])
    );

    mine(&dispatcher, 2).await;
    let first = ok(&dispatcher, "eth_getBlockByNumber", json!(["0x1", false])).await;
    let second = ok(&dispatcher, "eth_getBlockByNumber", json!(["0x2", false])).await;
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([first["hash"], second["hash"]])
    );
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([])
    );
}

#[tokio::test]
async fn block_filters_report_blocks_mined_again_after_a_rollback() {
    let dispatcher = dev_dispatcher(&[]);
    let id = ok(&dispatcher, "eth_newBlockFilter", json!([])).await;
    mine(&dispatcher, 2).await;
    let changes = ok(&dispatcher, "eth_getFilterChanges", json!([id])).await;
    assert_eq!(changes.as_array().map(Vec::len), Some(2));

    ok(&dispatcher, "anvil_rollback", json!(["0x2"])).await;
    mine(&dispatcher, 1).await;
    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["0x1", false])).await;
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([block["hash"]])
    );
}

#[tokio::test]
async fn log_filters_see_matching_logs_from_later_blocks() {
    let alice = signer(1);
    let dispatcher = dev_dispatcher(&[1]);
    let code = format!("0x{}", hex::encode(LOG_CODE));
    ok(&dispatcher, "anvil_setCode", json!([emitter(), code])).await;

    let matching = ok(&dispatcher, "eth_newFilter", json!([{"address": emitter()}])).await;
    let other = ok(&dispatcher, "eth_newFilter", json!([{"address": recipient()}])).await;

    let hash = ok(
        &dispatcher,
        "eth_sendRawTransaction",
        json!([raw_tx(&alice, 0, emitter(), &[])]),
    )
    .await;
    mine(&dispatcher, 1).await;

    let changes = ok(&dispatcher, "eth_getFilterChanges", json!([matching])).await;
    let logs = changes.as_array().expect("log list");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["transactionHash"], hash);
    assert_eq!(logs[0]["blockNumber"], "0x1");
    assert_eq!(logs[0]["data"], "0x00");
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([matching])).await,
        json!([])
    );
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([other])).await,
        json!([])
    );

    let all = ok(&dispatcher, "eth_getFilterLogs", json!([matching])).await;
    assert_eq!(all.as_array().map(Vec::len), Some(1));

    let ranged = ok(
        &dispatcher,
        "eth_getLogs",
        json!([{"fromBlock": "0x0", "toBlock": "latest", "address": emitter()}]),
    )
    .await;
    assert_eq!(ranged, all);
    let by_hash = ok(
        &dispatcher,
        "eth_getLogs",
        json!([{"blockHash": logs[0]["blockHash"]}]),
    )
    .await;
    assert_eq!(by_hash, all);
}

#[tokio::test]
async fn pending_filters_track_pool_additions() {
    let alice = signer(1);
    let dispatcher = dev_dispatcher(&[1]);
    let id = ok(&dispatcher, "eth_newPendingTransactionFilter", json!([])).await;
    let first = ok(
        &dispatcher,
        "eth_sendRawTransaction",
        json!([raw_tx(&alice, 0, recipient(), &[])]),
    )
    .await;
    let second = ok(
        &dispatcher,
        "eth_sendRawTransaction",
        json!([raw_tx(&alice, 1, recipient(), &[])]),
    )
    .await;
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([first, second])
    );
    assert_eq!(
        ok(&dispatcher, "eth_getFilterChanges", json!([id])).await,
        json!([])
    );
}

#[tokio::test]
async fn filter_logs_require_a_log_filter() {
    let dispatcher = dev_dispatcher(&[]);
    let id = ok(&dispatcher, "eth_newBlockFilter", json!([])).await;
    let error = err(&dispatcher, "eth_getFilterLogs", json!([id])).await;
    assert_eq!(error.code, CODE_FILTER_NOT_FOUND);

    let error = err(
        &dispatcher,
        "eth_getFilterLogs",
        json!(["0x00000000000000000000000000000000"]),
    )
    .await;
    assert_eq!(error.code, CODE_FILTER_NOT_FOUND);
}

#[tokio::test]
async fn new_filter_rejects_block_hash_criteria() {
    let dispatcher = dev_dispatcher(&[]);
    let error = err(
        &dispatcher,
        "eth_newFilter",
        json!([{"blockHash": format!("0x{}", "12".repeat(32))}]),
    )
    .await;
    assert_ne!(error.code, CODE_FILTER_NOT_FOUND);
    assert_eq!(
        ok(&dispatcher, "eth_getLogs", json!([{"fromBlock": "0x0"}])).await,
        Value::Array(Vec::new())
    );
}
