//! Upstream client with single-flight dedup, a pinned-response cache and
//! bounded retry.

use crate::error::ForkError;
use crate::transport::ForkTransport;
use crate::types::{RemoteAccount, RemoteHeader};
use alloy_primitives::{Address, Bytes, B256, U256, U64};
use evm_rpc_types::cache_policy::{cache_key, is_cacheable};
use evm_rpc_types::BlockTag;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Methods that may be sent twice without side effects.
const IDEMPOTENT: &[&str] = &[
    "eth_chainId",
    "net_version",
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_gasPrice",
];

fn is_idempotent(method: &str) -> bool {
    method.starts_with("eth_get") || IDEMPOTENT.contains(&method)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt deadline.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ForkError>>>;

struct Inner {
    transport: Arc<dyn ForkTransport>,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, Value>>,
    inflight: Mutex<HashMap<String, SharedFetch>>,
    upstream_calls: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ForkClient {
    inner: Arc<Inner>,
}

impl ForkClient {
    pub fn new(transport: Arc<dyn ForkTransport>, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                retry,
                cache: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                upstream_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Number of requests that actually went upstream, retries included.
    pub fn upstream_calls(&self) -> u64 {
        self.inner.upstream_calls.load(Ordering::Relaxed)
    }

    pub fn cached_entries(&self) -> usize {
        lock(&self.inner.cache).len()
    }

    /// Sends `method`. Requests naming immutable data are coalesced with any
    /// identical request in flight and answered from cache afterwards.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ForkError> {
        if !(method == "eth_chainId" || is_cacheable(method, &params)) {
            return Inner::fetch(Arc::clone(&self.inner), method.to_string(), params).await;
        }
        let key = cache_key(method, &params);
        if let Some(hit) = lock(&self.inner.cache).get(&key) {
            return Ok(hit.clone());
        }
        let fetch = {
            let mut inflight = lock(&self.inner.inflight);
            // The fetch fills the cache before leaving `inflight`, so a miss
            // here with no entry means nobody has fetched this key yet.
            if let Some(hit) = lock(&self.inner.cache).get(&key) {
                return Ok(hit.clone());
            }
            inflight
                .entry(key.clone())
                .or_insert_with(|| {
                    let inner = Arc::clone(&self.inner);
                    let method = method.to_string();
                    async move {
                        let result = Inner::fetch(Arc::clone(&inner), method, params).await;
                        if let Ok(value) = &result {
                            lock(&inner.cache).insert(key.clone(), value.clone());
                        }
                        lock(&inner.inflight).remove(&key);
                        result
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        fetch.await
    }

    pub async fn chain_id(&self) -> Result<u64, ForkError> {
        let value: U64 = self.typed("eth_chainId", json!([])).await?;
        Ok(value.to::<u64>())
    }

    pub async fn block_number(&self) -> Result<u64, ForkError> {
        let value: U64 = self.typed("eth_blockNumber", json!([])).await?;
        Ok(value.to::<u64>())
    }

    pub async fn block_by_number(&self, tag: BlockTag) -> Result<Option<RemoteHeader>, ForkError> {
        self.typed("eth_getBlockByNumber", json!([tag.to_value(), false]))
            .await
    }

    pub async fn header_at(&self, number: u64) -> Result<Option<RemoteHeader>, ForkError> {
        self.block_by_number(BlockTag::Number(number)).await
    }

    pub async fn block_hash(&self, number: u64) -> Result<Option<B256>, ForkError> {
        Ok(self.header_at(number).await?.map(|header| header.hash))
    }

    /// Balance, nonce and code of `address` as of block `number`.
    pub async fn account_at(&self, address: Address, number: u64) -> Result<RemoteAccount, ForkError> {
        let block = BlockTag::Number(number).to_value();
        let (balance, nonce, code) = futures::try_join!(
            self.typed::<U256>("eth_getBalance", json!([address, block])),
            self.typed::<U64>("eth_getTransactionCount", json!([address, block])),
            self.typed::<Bytes>("eth_getCode", json!([address, block])),
        )?;
        Ok(RemoteAccount {
            balance,
            nonce: nonce.to::<u64>(),
            code,
        })
    }

    pub async fn storage_at(&self, address: Address, slot: U256, number: u64) -> Result<U256, ForkError> {
        let slot = B256::from(slot);
        self.typed(
            "eth_getStorageAt",
            json!([address, slot, BlockTag::Number(number).to_value()]),
        )
        .await
    }

    async fn typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ForkError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|err| ForkError::InvalidResponse(format!("{method}: {err}")))
    }
}

impl Inner {
    async fn fetch(inner: Arc<Inner>, method: String, params: Value) -> Result<Value, ForkError> {
        let attempts = if is_idempotent(&method) {
            inner.retry.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            inner.upstream_calls.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(method = %method, attempt, "fork upstream request");
            let call = inner.transport.request(method.clone(), params.clone());
            let result = match inner.retry.timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ForkError::Timeout)),
                None => call.await,
            };
            match result {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = inner.retry.delay(attempt);
                    tracing::warn!(method = %method, attempt, error = %err, "fork request failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
