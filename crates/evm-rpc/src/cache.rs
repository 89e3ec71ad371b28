//! Response cache for block-pinned requests, persisted as a HAR-style
//! recording of request/response pairs.
//!
//! Entries live in memory; [`ResponseCache::flush`] writes them out. Nothing
//! is written on insert.

use crate::error::RpcError;
use evm_rpc_types::cache_policy::cache_key;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HAR_VERSION: &str = "1.2";
const MIME_JSON: &str = "application/json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarEntry {
    pub request: HarRequest,
    pub response: HarResponse,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub post_data: HarContent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HarResponse {
    pub status: u16,
    pub content: HarContent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub mime_type: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
struct CachedCall {
    method: String,
    params: Value,
    result: Value,
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: BTreeMap<String, CachedCall>,
    path: Option<PathBuf>,
    url: String,
}

impl ResponseCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the recording at `path` if one exists; later flushes go there.
    pub async fn open(path: PathBuf, chain_id: u64, identity: &str) -> Result<Self, RpcError> {
        let mut cache = Self {
            entries: BTreeMap::new(),
            path: Some(path.clone()),
            url: recording_url(chain_id, identity),
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let har: Har = serde_json::from_slice(&bytes).map_err(|err| {
                    RpcError::Internal(format!("corrupt recording {}: {err}", path.display()))
                })?;
                cache.load_har(&har)?;
                info!(path = %path.display(), entries = cache.len(), "cache: recording loaded");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "cache: no recording yet");
            }
            Err(err) => {
                return Err(RpcError::Internal(format!(
                    "read {}: {err}",
                    path.display()
                )))
            }
        }
        Ok(cache)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, method: &str, params: &Value) -> Option<Value> {
        self.entries
            .get(&cache_key(method, params))
            .map(|entry| entry.result.clone())
    }

    pub fn insert(&mut self, method: &str, params: &Value, result: Value) {
        self.entries.insert(
            cache_key(method, params),
            CachedCall {
                method: method.to_string(),
                params: params.clone(),
                result,
            },
        );
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            debug!(entries = self.entries.len(), "cache: cleared");
        }
        self.entries.clear();
    }

    pub fn to_har(&self) -> Har {
        let entries = self
            .entries
            .values()
            .map(|entry| HarEntry {
                request: HarRequest {
                    method: "POST".to_string(),
                    url: self.url.clone(),
                    post_data: HarContent {
                        mime_type: MIME_JSON.to_string(),
                        text: json!({
                            "jsonrpc": "2.0",
                            "id": 1,
                            "method": entry.method,
                            "params": entry.params,
                        })
                        .to_string(),
                    },
                },
                response: HarResponse {
                    status: 200,
                    content: HarContent {
                        mime_type: MIME_JSON.to_string(),
                        text: json!({"jsonrpc": "2.0", "id": 1, "result": entry.result})
                            .to_string(),
                    },
                },
            })
            .collect();
        Har {
            log: HarLog {
                version: HAR_VERSION.to_string(),
                creator: HarCreator {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                entries,
            },
        }
    }

    fn load_har(&mut self, har: &Har) -> Result<(), RpcError> {
        for entry in har.log.entries.iter() {
            let request: Value = serde_json::from_str(&entry.request.post_data.text)
                .map_err(|err| RpcError::Internal(format!("recorded request: {err}")))?;
            let response: Value = serde_json::from_str(&entry.response.content.text)
                .map_err(|err| RpcError::Internal(format!("recorded response: {err}")))?;
            let Some(method) = request.get("method").and_then(Value::as_str) else {
                continue;
            };
            let Some(result) = response.get("result") else {
                continue;
            };
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            self.insert(method, &params, result.clone());
        }
        Ok(())
    }

    /// Writes the recording. Returns the file written, or `None` for an
    /// in-memory cache.
    pub async fn flush(&self) -> Result<Option<PathBuf>, RpcError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(None);
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|err| RpcError::Internal(format!("create {}: {err}", dir.display())))?;
        }
        let body = serde_json::to_vec_pretty(&self.to_har())
            .map_err(|err| RpcError::Internal(format!("encode recording: {err}")))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|err| RpcError::Internal(format!("write {}: {err}", path.display())))?;
        info!(path = %path.display(), entries = self.len(), "cache: recording flushed");
        Ok(Some(path.clone()))
    }
}

fn recording_url(chain_id: u64, identity: &str) -> String {
    format!("evm-rpc://{chain_id}/{identity}")
}
