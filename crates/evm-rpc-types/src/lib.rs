//! JSON-RPC 2.0 wire types shared by the dispatcher and the fork client.

pub mod block_id;
pub mod cache_policy;
pub mod views;

pub use block_id::{BlockId, BlockTag};
pub use views::*;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL_ERROR: i64 = -32603;
pub const CODE_PARSE_ERROR: i64 = -32700;
/// Upstream (fork source) failure.
pub const CODE_TRANSPORT_ERROR: i64 = -32000;
pub const CODE_ACCOUNT_NOT_FOUND: i64 = -32001;
pub const CODE_FILTER_NOT_FOUND: i64 = -32002;
pub const CODE_SNAPSHOT_NOT_FOUND: i64 = -32003;
pub const CODE_STATE_ROOT_NOT_FOUND: i64 = -32004;
/// Execution reverted; revert data travels in `data`.
pub const CODE_EXECUTION_REVERTED: i64 = 3;

/// Keeps `"id": null` distinct from a missing id.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Positional parameters; `null`/missing reads as an empty list.
    pub fn positional(&self) -> Option<&[Value]> {
        match &self.params {
            Value::Array(items) => Some(items.as_slice()),
            Value::Null => Some(&[]),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("rpc error {code}: {message}")]
pub struct RpcErrorView {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorView {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            CODE_METHOD_NOT_FOUND,
            format!("method {method} does not exist or is not available"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, message)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RpcPayload {
    Result(Value),
    Error(RpcErrorView),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RpcResponse {
    pub id: Option<Value>,
    pub payload: RpcPayload,
}

impl RpcResponse {
    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            payload: RpcPayload::Result(result),
        }
    }

    pub fn error(id: Option<Value>, error: RpcErrorView) -> Self {
        Self {
            id,
            payload: RpcPayload::Error(error),
        }
    }

    pub fn as_result(&self) -> Option<&Value> {
        match &self.payload {
            RpcPayload::Result(value) => Some(value),
            RpcPayload::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&RpcErrorView> {
        match &self.payload {
            RpcPayload::Result(_) => None,
            RpcPayload::Error(error) => Some(error),
        }
    }
}

impl Serialize for RpcResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.id.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        match &self.payload {
            RpcPayload::Result(value) => map.serialize_entry("result", value)?,
            RpcPayload::Error(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RpcResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, deserialize_with = "present")]
            id: Option<Value>,
            #[serde(default, deserialize_with = "present")]
            result: Option<Value>,
            #[serde(default)]
            error: Option<RpcErrorView>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let payload = match (raw.error, raw.result) {
            (Some(error), _) => RpcPayload::Error(error),
            (None, Some(result)) => RpcPayload::Result(result),
            (None, None) => {
                return Err(serde::de::Error::custom(
                    "response carries neither result nor error",
                ))
            }
        };
        Ok(Self {
            id: raw.id,
            payload,
        })
    }
}
