//! Positional parameter access with `InvalidParams` on every malformed shape.

use crate::error::RpcError;
use alloy_primitives::{B256, U256};
use evm_rpc_types::block_id::parse_quantity;
use evm_rpc_types::BlockId;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Clone, Copy, Debug)]
pub struct Params<'a> {
    items: &'a [Value],
}

impl<'a> Params<'a> {
    pub fn new(items: &'a [Value]) -> Self {
        Self { items }
    }

    /// `params` must be an array or absent.
    pub fn from_value(params: &'a Value) -> Result<Self, RpcError> {
        match params {
            Value::Array(items) => Ok(Self::new(items)),
            Value::Null => Ok(Self::new(&[])),
            other => Err(RpcError::InvalidParams(format!(
                "params must be an array, got {other}"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&'a Value> {
        self.items.get(index).filter(|value| !value.is_null())
    }

    pub fn at_most(&self, count: usize) -> Result<(), RpcError> {
        if self.items.len() > count {
            return Err(RpcError::InvalidParams(format!(
                "expected at most {count} params, got {}",
                self.items.len()
            )));
        }
        Ok(())
    }

    pub fn required<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, RpcError> {
        let value = self
            .raw(index)
            .ok_or_else(|| RpcError::InvalidParams(format!("missing {name}")))?;
        decode(value, name)
    }

    pub fn optional<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<Option<T>, RpcError> {
        self.raw(index).map(|value| decode(value, name)).transpose()
    }

    /// Block selector at `index`, `latest` when absent.
    pub fn block(&self, index: usize) -> Result<BlockId, RpcError> {
        BlockId::parse_optional(self.items.get(index)).map_err(RpcError::InvalidParams)
    }

    pub fn quantity(&self, index: usize, name: &str) -> Result<u64, RpcError> {
        let value = self
            .raw(index)
            .ok_or_else(|| RpcError::InvalidParams(format!("missing {name}")))?;
        quantity(value).map_err(|err| RpcError::InvalidParams(format!("{name}: {err}")))
    }

    pub fn optional_quantity(&self, index: usize, name: &str) -> Result<Option<u64>, RpcError> {
        self.raw(index)
            .map(|value| {
                quantity(value).map_err(|err| RpcError::InvalidParams(format!("{name}: {err}")))
            })
            .transpose()
    }

    /// Storage slot given as a quantity or a 32-byte word.
    pub fn slot(&self, index: usize) -> Result<B256, RpcError> {
        let raw: String = self.required(index, "slot")?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        if digits.len() > 64 {
            return Err(RpcError::InvalidParams(format!("slot {raw} is longer than 32 bytes")));
        }
        U256::from_str_radix(digits, 16)
            .map(B256::from)
            .map_err(|err| RpcError::InvalidParams(format!("slot {raw}: {err}")))
    }
}

/// A JSON number or a `0x` hex string.
pub fn quantity(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| format!("{number} is not an unsigned integer")),
        Value::String(s) => parse_quantity(s),
        other => Err(format!("expected a quantity, got {other}")),
    }
}

fn decode<T: DeserializeOwned>(value: &Value, name: &str) -> Result<T, RpcError> {
    T::deserialize(value).map_err(|err| RpcError::InvalidParams(format!("{name}: {err}")))
}
