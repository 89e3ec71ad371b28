//! Block selectors: tags, numbers and hashes.

use alloy_primitives::B256;
use serde_json::Value;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Pending,
    Safe,
    Finalized,
    Earliest,
    Number(u64),
}

impl BlockTag {
    /// Only an explicit number names an immutable block.
    pub fn is_pinned(&self) -> bool {
        matches!(self, BlockTag::Number(_))
    }

    pub fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Pending => f.write_str("pending"),
            BlockTag::Safe => f.write_str("safe"),
            BlockTag::Finalized => f.write_str("finalized"),
            BlockTag::Earliest => f.write_str("earliest"),
            BlockTag::Number(n) => write!(f, "{n:#x}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockId {
    Tag(BlockTag),
    Hash(B256),
}

impl Default for BlockId {
    fn default() -> Self {
        BlockId::Tag(BlockTag::Latest)
    }
}

impl BlockId {
    pub fn is_pinned(&self) -> bool {
        match self {
            BlockId::Tag(tag) => tag.is_pinned(),
            BlockId::Hash(_) => true,
        }
    }

    pub fn number(n: u64) -> Self {
        BlockId::Tag(BlockTag::Number(n))
    }

    /// Accepts a tag, a hex number, a 32-byte hash, or an EIP-1898 object.
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => parse_str(s),
            Value::Object(map) => {
                if let Some(hash) = map.get("blockHash") {
                    let s = hash.as_str().ok_or("blockHash must be a string")?;
                    return parse_hash(s).map(BlockId::Hash);
                }
                if let Some(number) = map.get("blockNumber") {
                    return BlockId::parse(number);
                }
                Err("block object needs blockHash or blockNumber".to_string())
            }
            _ => Err(format!("invalid block selector: {value}")),
        }
    }

    /// Like [`parse`](Self::parse), treating a missing or null value as `latest`.
    pub fn parse_optional(value: Option<&Value>) -> Result<Self, String> {
        match value {
            None | Some(Value::Null) => Ok(BlockId::default()),
            Some(value) => BlockId::parse(value),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            BlockId::Tag(tag) => tag.to_value(),
            BlockId::Hash(hash) => Value::String(format!("{hash:#x}")),
        }
    }
}

fn parse_str(s: &str) -> Result<BlockId, String> {
    let tag = match s {
        "latest" => BlockTag::Latest,
        "pending" => BlockTag::Pending,
        "safe" => BlockTag::Safe,
        "finalized" => BlockTag::Finalized,
        "earliest" => BlockTag::Earliest,
        _ if s.len() == 66 => return parse_hash(s).map(BlockId::Hash),
        _ => BlockTag::Number(parse_quantity(s)?),
    };
    Ok(BlockId::Tag(tag))
}

fn parse_hash(s: &str) -> Result<B256, String> {
    s.parse::<B256>()
        .map_err(|err| format!("invalid block hash {s}: {err}"))
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Result<u64, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| format!("quantity {s} must be 0x-prefixed"))?;
    if digits.is_empty() {
        return Err(format!("empty quantity {s}"));
    }
    u64::from_str_radix(digits, 16).map_err(|err| format!("invalid quantity {s}: {err}"))
}
