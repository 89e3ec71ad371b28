//! Upstream transports: HTTP and an in-process mock.

use crate::error::ForkError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// One JSON-RPC round trip. The returned future owns everything it needs.
pub trait ForkTransport: Send + Sync + 'static {
    fn request(&self, method: String, params: Value) -> BoxFuture<'static, Result<Value, ForkError>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ForkError> {
        let url = Url::parse(url).map_err(|err| ForkError::InvalidUrl(err.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ForkError::from_reqwest)?;
        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }
}

impl ForkTransport for HttpTransport {
    fn request(&self, method: String, params: Value) -> BoxFuture<'static, Result<Value, ForkError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        async move {
            let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
            let response = client
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(ForkError::from_reqwest)?;
            let status = response.status();
            if !status.is_success() {
                return Err(ForkError::Network(format!("http status {status}")));
            }
            let payload: Value = response.json().await.map_err(ForkError::from_reqwest)?;
            parse_payload(payload)
        }
        .boxed()
    }
}

/// Splits a JSON-RPC response body into result or error.
pub fn parse_payload(payload: Value) -> Result<Value, ForkError> {
    if let Some(error) = payload.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ForkError::Rpc { code, message });
    }
    match payload {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| ForkError::InvalidResponse("missing result".to_string())),
        other => Err(ForkError::InvalidResponse(other.to_string())),
    }
}

type Responder = dyn Fn(&str, &Value) -> Result<Value, ForkError> + Send + Sync;

/// In-process transport answering from a closure, with a call log.
#[derive(Clone)]
pub struct MockTransport {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, ForkError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: None,
        }
    }

    /// Delays every answer, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn count_of(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

impl ForkTransport for MockTransport {
    fn request(&self, method: String, params: Value) -> BoxFuture<'static, Result<Value, ForkError>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((method.clone(), params.clone()));
        let responder = Arc::clone(&self.responder);
        let latency = self.latency;
        async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            responder(&method, &params)
        }
        .boxed()
    }
}
