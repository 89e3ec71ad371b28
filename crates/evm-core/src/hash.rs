//! Where: local block production / What: PREVRANDAO derived from the parent.

use alloy_primitives::{keccak256, B256};

/// Deterministic PREVRANDAO for a locally mined block.
pub fn prevrandao(parent_hash: B256, number: u64) -> B256 {
    let mut buf = Vec::with_capacity(1 + 32 + 8);
    buf.push(0x02);
    buf.extend_from_slice(parent_hash.as_slice());
    buf.extend_from_slice(&number.to_be_bytes());
    keccak256(&buf)
}
