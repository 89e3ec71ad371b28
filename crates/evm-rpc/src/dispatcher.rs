//! JSON-RPC entry point. Every request passes the same stages in order:
//! envelope validation, the ready gate, alias resolution, the response
//! cache, fork relay planning, routing, and finally cache storage.
//!
//! Lock order is engine, then cache. Results are stored and the cache is
//! cleared only while the engine is held, so a store never lands after a
//! history rewrite it predates. Read-only methods release the engine while
//! a fork miss is fetched; writes keep it for their whole run.

use crate::cache::ResponseCache;
use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::filters::FilterRegistry;
use crate::params::Params;
use crate::procedures::{
    canonical_method, clears_cache, defers_fetches, plan_relay, route, Engine, Relay,
};
use evm_core::{fetch_entry, Node, NodeConfig, NodeError};
use evm_db::Block;
use evm_rpc_types::block_id::parse_quantity;
use evm_rpc_types::cache_policy::{cache_anchor, is_hash_keyed, CacheAnchor};
use evm_rpc_types::{
    BlockId, BlockTag, RpcErrorView, RpcRequest, RpcResponse, CODE_INTERNAL_ERROR, JSONRPC_VERSION,
};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

/// Upper bound on unlocked fetch rounds for one request.
const MAX_FETCH_ROUNDS: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Startup {
    Pending,
    Ready,
    Failed(String),
}

struct Inner {
    config: RpcConfig,
    startup: watch::Receiver<Startup>,
    engine: Mutex<Option<Engine>>,
    cache: Mutex<ResponseCache>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// A dispatcher over a running node with an in-memory response cache.
    pub fn new(node: Node, config: RpcConfig) -> Self {
        let (_, startup) = watch::channel(Startup::Ready);
        let filters = FilterRegistry::new(config.filter_expiry());
        Self::assemble(
            config,
            startup,
            Some(Engine::new(node, filters)),
            ResponseCache::in_memory(),
        )
    }

    /// Like [`new`](Self::new), loading the recording under
    /// `config.cache_dir` when one is configured.
    pub async fn open(node: Node, config: RpcConfig) -> Result<Self, RpcError> {
        let (_, startup) = watch::channel(Startup::Ready);
        let dispatcher = Self::assemble(config, startup, None, ResponseCache::in_memory());
        boot(&dispatcher.inner, async move { Ok(node) }).await?;
        Ok(dispatcher)
    }

    /// Returns immediately; requests wait until `startup` resolves. A failed
    /// startup turns every request into an internal error.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_startup<F>(startup: F, config: RpcConfig) -> Self
    where
        F: Future<Output = Result<Node, NodeError>> + Send + 'static,
    {
        let (sender, receiver) = watch::channel(Startup::Pending);
        let dispatcher = Self::assemble(config, receiver, None, ResponseCache::in_memory());
        let inner = Arc::clone(&dispatcher.inner);
        tokio::spawn(async move {
            let state = match boot(&inner, startup).await {
                Ok(()) => Startup::Ready,
                Err(err) => {
                    error!(error = %err, "rpc: node startup failed");
                    Startup::Failed(err.to_string())
                }
            };
            sender.send_replace(state);
        });
        dispatcher
    }

    /// Starts a node from `node_config`, forking when it names a source.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(node_config: NodeConfig, config: RpcConfig) -> Self {
        Self::with_startup(Node::from_config(node_config), config)
    }

    fn assemble(
        config: RpcConfig,
        startup: watch::Receiver<Startup>,
        engine: Option<Engine>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                startup,
                engine: Mutex::new(engine),
                cache: Mutex::new(cache),
            }),
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Writes the response recording, if one is configured.
    pub async fn flush_cache(&self) -> Result<Option<PathBuf>, RpcError> {
        self.inner.cache.lock().await.flush().await
    }

    pub async fn cache_len(&self) -> usize {
        self.inner.cache.lock().await.len()
    }

    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        match self.dispatch(&request).await {
            Ok(result) => RpcResponse::result(id, result),
            Err(err) => {
                debug!(method = %request.method, code = err.code(), error = %err, "rpc: request failed");
                RpcResponse::error(id, err.to_view())
            }
        }
    }

    /// Handles `requests` in order; each fails independently.
    pub async fn handle_bulk(&self, requests: Vec<RpcRequest>) -> Vec<RpcResponse> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            responses.push(self.handle(request).await);
        }
        responses
    }

    /// Handles a decoded JSON payload: one request object or a batch array.
    pub async fn handle_value(&self, payload: Value) -> Value {
        match payload {
            Value::Array(items) if items.is_empty() => response_value(&RpcResponse::error(
                None,
                RpcError::InvalidRequest("empty batch".to_string()).to_view(),
            )),
            Value::Array(items) => {
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    responses.push(response_value(&self.handle_item(item).await));
                }
                Value::Array(responses)
            }
            item => response_value(&self.handle_item(item).await),
        }
    }

    /// Handles raw request text, answering malformed JSON with a parse error.
    pub async fn handle_json(&self, body: &str) -> String {
        let response = match serde_json::from_str::<Value>(body) {
            Ok(payload) => self.handle_value(payload).await,
            Err(err) => response_value(&RpcResponse::error(
                None,
                RpcError::Parse(err.to_string()).to_view(),
            )),
        };
        response.to_string()
    }

    async fn handle_item(&self, item: Value) -> RpcResponse {
        let id = item.get("id").cloned();
        match serde_json::from_value::<RpcRequest>(item) {
            Ok(request) => self.handle(request).await,
            Err(err) => RpcResponse::error(id, RpcError::InvalidRequest(err.to_string()).to_view()),
        }
    }

    async fn dispatch(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        validate(request)?;
        let params = Params::from_value(&request.params)?;
        self.ready().await?;
        let method = canonical_method(&request.method);
        let anchor = self
            .inner
            .config
            .cache_enabled
            .then(|| cache_anchor(&method, &request.params))
            .flatten();
        if anchor.is_some() {
            if let Some(hit) = self.inner.cache.lock().await.get(&method, &request.params) {
                debug!(method = %method, "rpc: cache hit");
                return Ok(hit);
            }
        }
        self.execute(&method, &request.params, params, anchor).await
    }

    /// Routes locally or relays upstream, then stores the result if it has
    /// settled.
    async fn execute(
        &self,
        method: &str,
        raw: &Value,
        params: Params<'_>,
        anchor: Option<CacheAnchor>,
    ) -> Result<Value, RpcError> {
        let defer = defers_fetches(method);
        let mut guard = self.inner.engine.lock().await;
        for _ in 0..MAX_FETCH_ROUNDS {
            let engine = running(&mut guard)?;
            engine.filters.expire_idle(Instant::now());
            let history = engine.history;
            match plan_relay(&engine.node, method, raw) {
                Relay::Local => {
                    engine.node.set_deferred_fetches(defer);
                    let routed = route(engine, method, params).await;
                    engine.node.set_deferred_fetches(false);
                    let result = match routed {
                        Err(RpcError::Node(NodeError::FetchDeferred(key))) => {
                            let (client, fork) = engine
                                .node
                                .fork_client()
                                .zip(engine.node.fork_info())
                                .ok_or_else(|| RpcError::Internal("fetch deferred without a fork".to_string()))?;
                            drop(guard);
                            debug!(method, ?key, "rpc: fetching fork state with the engine unlocked");
                            let entry = fetch_entry(&client, fork.block_number, key).await?;
                            guard = self.inner.engine.lock().await;
                            running(&mut guard)?.node.apply_fetched(entry);
                            continue;
                        }
                        routed => routed?,
                    };
                    if clears_cache(method) {
                        engine.history += 1;
                        engine.filters.rewind(engine.node.block_number());
                        self.inner.cache.lock().await.clear();
                        return Ok(result);
                    }
                    let fallback = engine
                        .node
                        .fork_client()
                        .filter(|_| result.is_null() && is_hash_keyed(method));
                    let Some(client) = fallback else {
                        self.store(engine, method, raw, anchor, &result).await;
                        return Ok(result);
                    };
                    drop(guard);
                    debug!(method, "rpc: unknown locally, asking fork source");
                    let remote = client.request(method, raw.clone()).await?;
                    return self.store_relayed(method, raw, anchor, history, remote).await;
                }
                Relay::Upstream(client) => {
                    drop(guard);
                    debug!(method, "rpc: relayed to fork source");
                    let remote = client.request(method, raw.clone()).await?;
                    return self.store_relayed(method, raw, anchor, history, remote).await;
                }
                Relay::SplitLogs { client, upstream, local } => {
                    let local_logs = match local.as_ref() {
                        Some(local) => into_array(route(engine, method, Params::from_value(local)?).await?)?,
                        None => Vec::new(),
                    };
                    drop(guard);
                    debug!(method, "rpc: logs relayed to fork source");
                    let mut logs = into_array(client.request(method, upstream).await?)?;
                    logs.extend(local_logs);
                    return self
                        .store_relayed(method, raw, anchor, history, Value::Array(logs))
                        .await;
                }
            }
        }
        Err(RpcError::Internal("fork resolution did not converge".to_string()))
    }

    /// Caches `result` if its anchor block is below the head. The caller
    /// holds the engine.
    async fn store(&self, engine: &Engine, method: &str, raw: &Value, anchor: Option<CacheAnchor>, result: &Value) {
        let Some(anchor) = anchor else {
            return;
        };
        if is_settled(&engine.node, anchor, result) {
            self.inner
                .cache
                .lock()
                .await
                .insert(method, raw, result.clone());
        }
    }

    /// Stores a result fetched with the engine unlocked, unless history was
    /// rewritten in the meantime.
    async fn store_relayed(
        &self,
        method: &str,
        raw: &Value,
        anchor: Option<CacheAnchor>,
        history: u64,
        result: Value,
    ) -> Result<Value, RpcError> {
        if anchor.is_some() {
            let guard = self.inner.engine.lock().await;
            match guard.as_ref() {
                Some(engine) if engine.history == history => {
                    self.store(engine, method, raw, anchor, &result).await;
                }
                _ => debug!(method, "rpc: history rewritten during relay, result not cached"),
            }
        }
        Ok(result)
    }

    async fn ready(&self) -> Result<(), RpcError> {
        let mut startup = self.inner.startup.clone();
        let state = startup
            .wait_for(|state| *state != Startup::Pending)
            .await
            .map_err(|_| RpcError::Internal("node startup was abandoned".to_string()))?;
        match &*state {
            Startup::Failed(reason) => Err(NodeError::NotReady(reason.clone()).into()),
            Startup::Pending | Startup::Ready => Ok(()),
        }
    }
}

/// Installs the node and its recording into `inner`.
async fn boot<F>(inner: &Inner, startup: F) -> Result<(), RpcError>
where
    F: Future<Output = Result<Node, NodeError>>,
{
    let node = startup.await?;
    let chain_id = node.chain_id();
    if let Some(path) = inner.config.recording_path(chain_id) {
        let cache = ResponseCache::open(path, chain_id, &inner.config.test_identity).await?;
        *inner.cache.lock().await = cache;
    }
    info!(
        chain_id,
        block_number = node.block_number(),
        forked = node.fork_info().is_some(),
        "rpc: node ready"
    );
    let filters = FilterRegistry::new(inner.config.filter_expiry());
    *inner.engine.lock().await = Some(Engine::new(node, filters));
    Ok(())
}

fn validate(request: &RpcRequest) -> Result<(), RpcError> {
    if let Some(version) = request.jsonrpc.as_deref() {
        if version != JSONRPC_VERSION {
            return Err(RpcError::InvalidRequest(format!(
                "unsupported jsonrpc version {version}"
            )));
        }
    }
    if request.method.is_empty() {
        return Err(RpcError::InvalidRequest("method must not be empty".to_string()));
    }
    Ok(())
}

fn running(engine: &mut Option<Engine>) -> Result<&mut Engine, RpcError> {
    engine
        .as_mut()
        .ok_or_else(|| RpcError::Internal("node is not running".to_string()))
}

/// Whether `result` can no longer change: the block it belongs to is known
/// and below the head. Head blocks may still be rolled back, and the head
/// state still takes cheatcode writes.
fn is_settled(node: &Node, anchor: CacheAnchor, result: &Value) -> bool {
    if result.is_null() {
        return false;
    }
    let number = match anchor {
        CacheAnchor::ResultBlock => result_block_number(result),
        CacheAnchor::Block(BlockId::Tag(BlockTag::Number(number))) => Some(number),
        CacheAnchor::Block(BlockId::Tag(_)) => None,
        CacheAnchor::Block(BlockId::Hash(hash)) => node
            .chain()
            .block_by_hash(&hash)
            .map(Block::number)
            .or_else(|| result_block_number(result)),
    };
    number.is_some_and(|number| number < node.block_number())
}

/// `blockNumber` of a transaction or receipt, `number` of a block.
fn result_block_number(result: &Value) -> Option<u64> {
    result
        .get("blockNumber")
        .or_else(|| result.get("number"))
        .and_then(Value::as_str)
        .and_then(|number| parse_quantity(number).ok())
}

fn into_array(value: Value) -> Result<Vec<Value>, RpcError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(RpcError::Internal(format!("expected a log list, got {other}"))),
    }
}

fn response_value(response: &RpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|err| {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "error": RpcErrorView::new(CODE_INTERNAL_ERROR, err.to_string()),
        })
    })
}
