use evm_fork::{ForkClient, ForkError, MockTransport, RetryPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADDR: &str = "0x11111111111111111111111111111111111111ab";

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        timeout: None,
    }
}

fn balance_mock() -> MockTransport {
    MockTransport::new(|method, _params| match method {
        "eth_getBalance" => Ok(json!("0x2a")),
        "eth_blockNumber" => Ok(json!("0x64")),
        other => Err(ForkError::Rpc {
            code: -32601,
            message: format!("unexpected {other}"),
        }),
    })
    .with_latency(Duration::from_millis(20))
}

#[tokio::test]
async fn concurrent_pinned_requests_share_one_upstream_call() {
    let mock = balance_mock();
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(1));
    let params = json!([ADDR, "0x5"]);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let params = params.clone();
            tokio::spawn(async move { client.request("eth_getBalance", params).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.expect("join"), Ok(json!("0x2a")));
    }
    assert_eq!(mock.count_of("eth_getBalance"), 1);

    // Served from cache afterwards, including with different hex case.
    let upper = json!([ADDR.to_uppercase().replace("0X", "0x"), "0x5"]);
    assert_eq!(client.request("eth_getBalance", upper).await, Ok(json!("0x2a")));
    assert_eq!(mock.count_of("eth_getBalance"), 1);
    assert_eq!(client.cached_entries(), 1);
}

#[tokio::test]
async fn floating_requests_always_go_upstream() {
    let mock = balance_mock();
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(1));
    for _ in 0..2 {
        client
            .request("eth_getBalance", json!([ADDR, "latest"]))
            .await
            .expect("balance");
    }
    client.block_number().await.expect("block number");
    client.block_number().await.expect("block number");
    assert_eq!(mock.count_of("eth_getBalance"), 2);
    assert_eq!(mock.count_of("eth_blockNumber"), 2);
    assert_eq!(client.cached_entries(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_then_succeed() {
    let failures = Arc::new(AtomicUsize::new(2));
    let remaining = Arc::clone(&failures);
    let mock = MockTransport::new(move |_, _| {
        if remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(ForkError::Network("connection reset".to_string()))
        } else {
            Ok(json!("0x1"))
        }
    });
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(3));
    let value = client
        .request("eth_getBalance", json!([ADDR, "0x1"]))
        .await
        .expect("third attempt succeeds");
    assert_eq!(value, json!("0x1"));
    assert_eq!(mock.call_count(), 3);
    assert_eq!(client.upstream_calls(), 3);
}

#[tokio::test]
async fn retries_are_bounded_and_errors_not_cached() {
    let mock = MockTransport::new(|_, _| Err(ForkError::Timeout));
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(2));
    let params = json!([ADDR, "0x1"]);
    assert_eq!(
        client.request("eth_getBalance", params.clone()).await,
        Err(ForkError::Timeout)
    );
    assert_eq!(mock.call_count(), 2);
    assert_eq!(client.cached_entries(), 0);
    assert!(client.request("eth_getBalance", params).await.is_err());
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test]
async fn rpc_errors_and_writes_are_not_retried() {
    let mock = MockTransport::new(|method, _| match method {
        "eth_sendRawTransaction" => Err(ForkError::Network("down".to_string())),
        _ => Err(ForkError::Rpc {
            code: -32000,
            message: "header not found".to_string(),
        }),
    });
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(5));
    assert!(client
        .request("eth_sendRawTransaction", json!(["0x00"]))
        .await
        .is_err());
    assert!(client
        .request("eth_getBalance", json!([ADDR, "0x1"]))
        .await
        .is_err());
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn account_at_reads_balance_nonce_and_code() {
    let mock = MockTransport::new(|method, params: &Value| {
        assert_eq!(params[1], json!("0x7"));
        match method {
            "eth_getBalance" => Ok(json!("0x64")),
            "eth_getTransactionCount" => Ok(json!("0x3")),
            "eth_getCode" => Ok(json!("0x6000")),
            other => panic!("unexpected {other}"),
        }
    });
    let client = ForkClient::new(Arc::new(mock.clone()), fast_retry(1));
    let address = ADDR.parse().expect("address");
    let account = client.account_at(address, 7).await.expect("account");
    assert_eq!(account.balance, alloy_primitives::U256::from(100));
    assert_eq!(account.nonce, 3);
    assert_eq!(account.code.as_ref(), &[0x60, 0x00]);
    client.account_at(address, 7).await.expect("cached");
    assert_eq!(mock.call_count(), 3);
}
