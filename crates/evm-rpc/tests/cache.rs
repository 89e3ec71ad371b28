mod common;

use common::{dev_node, ether, mine, ok, raw_tx, recipient, signer};
use evm_rpc::{Dispatcher, RpcConfig};
use serde_json::{json, Value};

fn balance_of_alice(block: &str) -> Value {
    json!([signer(1).address(), block])
}

#[tokio::test]
async fn floating_tags_are_never_cached() {
    let dispatcher = Dispatcher::new(dev_node(&[1]), RpcConfig::default());
    ok(&dispatcher, "eth_getBalance", balance_of_alice("latest")).await;
    ok(&dispatcher, "eth_getBalance", balance_of_alice("pending")).await;
    ok(&dispatcher, "eth_blockNumber", json!([])).await;
    assert_eq!(dispatcher.cache_len().await, 0);
}

#[tokio::test]
async fn only_settled_blocks_are_cached() {
    let dispatcher = Dispatcher::new(dev_node(&[1]), RpcConfig::default());
    mine(&dispatcher, 2).await;

    ok(&dispatcher, "eth_getBalance", balance_of_alice("0x1")).await;
    assert_eq!(dispatcher.cache_len().await, 1);
    // The head block may still be rewritten.
    ok(&dispatcher, "eth_getBalance", balance_of_alice("0x2")).await;
    assert_eq!(dispatcher.cache_len().await, 1);

    let block = ok(&dispatcher, "eth_getBlockByNumber", json!(["0x1", false])).await;
    assert_eq!(dispatcher.cache_len().await, 2);
    ok(&dispatcher, "eth_getBlockByHash", json!([block["hash"], false])).await;
    assert_eq!(dispatcher.cache_len().await, 3);

    let missing = format!("0x{}", "42".repeat(32));
    let receipt = ok(&dispatcher, "eth_getTransactionReceipt", json!([missing])).await;
    assert_eq!(receipt, Value::Null);
    assert_eq!(dispatcher.cache_len().await, 3);
}

#[tokio::test]
async fn pending_transactions_are_cached_only_once_settled() {
    let alice = signer(1);
    let dispatcher = Dispatcher::new(dev_node(&[1]), RpcConfig::default());
    let hash = ok(
        &dispatcher,
        "eth_sendRawTransaction",
        json!([raw_tx(&alice, 0, recipient(), &[])]),
    )
    .await;

    let pending = ok(&dispatcher, "eth_getTransactionByHash", json!([hash])).await;
    assert_eq!(pending["blockNumber"], Value::Null);
    assert_eq!(dispatcher.cache_len().await, 0);

    mine(&dispatcher, 1).await;
    let mined = ok(&dispatcher, "eth_getTransactionByHash", json!([hash])).await;
    assert_eq!(mined["blockNumber"], "0x1");
    let receipt = ok(&dispatcher, "eth_getTransactionReceipt", json!([hash])).await;
    assert_eq!(receipt["blockNumber"], "0x1");
    // Block 1 is still the head and may be rolled back.
    assert_eq!(dispatcher.cache_len().await, 0);

    mine(&dispatcher, 1).await;
    ok(&dispatcher, "eth_getTransactionByHash", json!([hash])).await;
    ok(&dispatcher, "eth_getTransactionReceipt", json!([hash])).await;
    assert_eq!(dispatcher.cache_len().await, 2);
}

#[tokio::test]
async fn head_hash_reads_follow_cheatcode_writes() {
    let dispatcher = Dispatcher::new(dev_node(&[1]), RpcConfig::default());
    mine(&dispatcher, 1).await;
    let head = ok(&dispatcher, "eth_getBlockByNumber", json!(["latest", false])).await;
    let by_hash = json!([recipient(), head["hash"]]);

    assert_eq!(ok(&dispatcher, "eth_getBalance", by_hash.clone()).await, "0x0");
    ok(&dispatcher, "anvil_setBalance", json!([recipient(), "0x5"])).await;
    assert_eq!(ok(&dispatcher, "eth_getBalance", by_hash.clone()).await, "0x5");
    assert_eq!(
        ok(&dispatcher, "eth_getBalance", json!([recipient(), "0x1"])).await,
        "0x5"
    );

    let call = json!([{"to": recipient()}, {"blockHash": head["hash"]}]);
    ok(&dispatcher, "eth_call", call).await;
    assert_eq!(dispatcher.cache_len().await, 0);

    // Once buried, the hash names the state sealed with block 1, which
    // predates the write, and that answer is settled.
    mine(&dispatcher, 1).await;
    assert_eq!(ok(&dispatcher, "eth_getBalance", by_hash.clone()).await, "0x0");
    assert_eq!(dispatcher.cache_len().await, 1);
    assert_eq!(ok(&dispatcher, "eth_getBalance", by_hash).await, "0x0");
}

#[tokio::test]
async fn history_rewrites_clear_the_cache() {
    let dispatcher = Dispatcher::new(dev_node(&[1]), RpcConfig::default());
    mine(&dispatcher, 3).await;
    ok(&dispatcher, "eth_getBlockByNumber", json!(["0x1", false])).await;
    ok(&dispatcher, "eth_getBlockByNumber", json!(["0x2", false])).await;
    assert_eq!(dispatcher.cache_len().await, 2);

    ok(&dispatcher, "anvil_rollback", json!(["0x2"])).await;
    assert_eq!(dispatcher.cache_len().await, 0);
    assert_eq!(
        ok(&dispatcher, "eth_getBlockByNumber", json!(["0x2", false])).await,
        Value::Null
    );

    ok(&dispatcher, "eth_getBlockByNumber", json!(["0x0", false])).await;
    let snapshot = ok(&dispatcher, "evm_snapshot", json!([])).await;
    ok(&dispatcher, "evm_revert", json!([snapshot])).await;
    assert_eq!(dispatcher.cache_len().await, 0);
}

#[tokio::test]
async fn disabled_cache_stores_nothing() {
    let config = RpcConfig {
        cache_enabled: false,
        ..RpcConfig::default()
    };
    let dispatcher = Dispatcher::new(dev_node(&[1]), config);
    mine(&dispatcher, 2).await;
    ok(&dispatcher, "eth_getBalance", balance_of_alice("0x1")).await;
    assert_eq!(dispatcher.cache_len().await, 0);
}

#[tokio::test]
async fn recordings_replay_in_a_later_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RpcConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        test_identity: "suite/case".to_string(),
        ..RpcConfig::default()
    };

    let recording = Dispatcher::open(dev_node(&[1]), config.clone())
        .await
        .expect("open");
    mine(&recording, 1).await;
    let funded = ok(&recording, "eth_getBalance", balance_of_alice("0x0")).await;
    assert_eq!(funded, json!(ether(100)));
    let path = recording
        .flush_cache()
        .await
        .expect("flush")
        .expect("recording path");
    assert!(path.ends_with("31337/suite_case.har.json"));
    assert!(path.exists());

    // Alice holds nothing on the replaying node; the answer comes from disk.
    let replay = Dispatcher::open(dev_node(&[]), config).await.expect("reopen");
    assert_eq!(replay.cache_len().await, 1);
    assert_eq!(
        ok(&replay, "eth_getBalance", balance_of_alice("0x0")).await,
        funded
    );
    assert_eq!(
        ok(&replay, "eth_getBalance", balance_of_alice("latest")).await,
        "0x0"
    );
}

#[tokio::test]
async fn in_memory_dispatchers_have_nothing_to_flush() {
    let dispatcher = Dispatcher::new(dev_node(&[]), RpcConfig::default());
    assert_eq!(dispatcher.flush_cache().await.expect("flush"), None);
}
