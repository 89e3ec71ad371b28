//! Merkle-Patricia roots for state, storage, transactions and receipts.

use crate::types::{AccountState, LogEntry, TxReceipt};
use alloy_primitives::{keccak256, Address, Bloom, B256, U256};
use alloy_rlp::{Encodable, Header};
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};
use std::collections::BTreeMap;

/// Builds a root from already-hashed keys.
fn root_from_hashed(mut leaves: Vec<(B256, Vec<u8>)>) -> B256 {
    if leaves.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    leaves.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (key, value) in leaves.iter() {
        builder.add_leaf(Nibbles::unpack(key), value);
    }
    builder.root()
}

pub fn storage_root<'a>(slots: impl IntoIterator<Item = (&'a B256, &'a U256)>) -> B256 {
    let leaves = slots
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(slot, value)| (keccak256(slot), alloy_rlp::encode(value)))
        .collect();
    root_from_hashed(leaves)
}

fn encode_account(account: &AccountState, storage_root: B256) -> Vec<u8> {
    let payload_length = account.nonce.length()
        + account.balance.length()
        + storage_root.length()
        + account.code_hash.length();
    let mut out = Vec::with_capacity(payload_length + 3);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    account.nonce.encode(&mut out);
    account.balance.encode(&mut out);
    storage_root.encode(&mut out);
    account.code_hash.encode(&mut out);
    out
}

/// State root over `accounts`; `storage` is grouped by owner beforehand.
pub fn state_root(
    accounts: &BTreeMap<Address, AccountState>,
    storage: &BTreeMap<Address, BTreeMap<B256, U256>>,
) -> B256 {
    let leaves = accounts
        .iter()
        .map(|(address, account)| {
            let root = storage
                .get(address)
                .map(|slots| storage_root(slots.iter()))
                .unwrap_or(EMPTY_ROOT_HASH);
            (keccak256(address), encode_account(account, root))
        })
        .collect();
    root_from_hashed(leaves)
}

/// Root of a list trie keyed by `rlp(index)`, as used for transactions and receipts.
pub fn ordered_trie_root(items: &[Vec<u8>]) -> B256 {
    if items.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    let mut leaves: Vec<(Vec<u8>, &Vec<u8>)> = items
        .iter()
        .enumerate()
        .map(|(index, item)| (alloy_rlp::encode(index), item))
        .collect();
    leaves.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = HashBuilder::default();
    for (key, value) in leaves.iter() {
        builder.add_leaf(Nibbles::unpack(key), value.as_slice());
    }
    builder.root()
}

pub fn logs_bloom<'a>(logs: impl IntoIterator<Item = &'a LogEntry>) -> Bloom {
    let mut bloom = Bloom::ZERO;
    for log in logs {
        bloom.accrue_raw_log(log.address, &log.topics);
    }
    bloom
}

fn encode_log(log: &LogEntry, out: &mut Vec<u8>) {
    let topics_length: usize = log.topics.iter().map(Encodable::length).sum();
    let topics_header = Header {
        list: true,
        payload_length: topics_length,
    };
    let payload_length =
        log.address.length() + topics_header.length() + topics_length + log.data.length();
    Header {
        list: true,
        payload_length,
    }
    .encode(out);
    log.address.encode(out);
    topics_header.encode(out);
    for topic in log.topics.iter() {
        topic.encode(out);
    }
    log.data.encode(out);
}

/// Consensus encoding of a receipt, type-prefixed for typed transactions.
pub fn encode_receipt(receipt: &TxReceipt) -> Vec<u8> {
    let mut logs = Vec::new();
    for log in receipt.logs.iter() {
        encode_log(log, &mut logs);
    }
    let logs_header = Header {
        list: true,
        payload_length: logs.len(),
    };
    let payload_length = receipt.status.length()
        + receipt.cumulative_gas_used.length()
        + receipt.logs_bloom.length()
        + logs_header.length()
        + logs.len();
    let mut out = Vec::with_capacity(payload_length + 8);
    if receipt.tx_type != 0 {
        out.push(receipt.tx_type);
    }
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    receipt.status.encode(&mut out);
    receipt.cumulative_gas_used.encode(&mut out);
    receipt.logs_bloom.encode(&mut out);
    logs_header.encode(&mut out);
    out.extend_from_slice(&logs);
    out
}

pub fn receipts_root(receipts: &[TxReceipt]) -> B256 {
    let encoded: Vec<Vec<u8>> = receipts.iter().map(encode_receipt).collect();
    ordered_trie_root(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::BloomInput;

    #[test]
    fn empty_tries_use_empty_root() {
        assert_eq!(state_root(&BTreeMap::new(), &BTreeMap::new()), EMPTY_ROOT_HASH);
        assert_eq!(ordered_trie_root(&[]), EMPTY_ROOT_HASH);
        assert_eq!(storage_root(std::iter::empty()), EMPTY_ROOT_HASH);
    }

    #[test]
    fn zero_slots_do_not_change_storage_root() {
        let slot_a = B256::with_last_byte(1);
        let slot_b = B256::with_last_byte(2);
        let mut with_zero = BTreeMap::new();
        with_zero.insert(slot_a, U256::from(5u64));
        with_zero.insert(slot_b, U256::ZERO);
        let mut without = BTreeMap::new();
        without.insert(slot_a, U256::from(5u64));
        assert_eq!(storage_root(with_zero.iter()), storage_root(without.iter()));
        assert_ne!(storage_root(without.iter()), EMPTY_ROOT_HASH);
    }

    #[test]
    fn account_change_moves_state_root() {
        let mut accounts = BTreeMap::new();
        accounts.insert(Address::ZERO, AccountState::default());
        let root = state_root(&accounts, &BTreeMap::new());
        assert_eq!(root, state_root(&accounts.clone(), &BTreeMap::new()));
        let mut changed = accounts.clone();
        changed.insert(Address::ZERO, AccountState::new(1, U256::ZERO));
        assert_ne!(state_root(&changed, &BTreeMap::new()), root);
    }

    #[test]
    fn bloom_contains_log_address_and_topics() {
        let log = LogEntry {
            address: Address::repeat_byte(0xaa),
            topics: vec![B256::repeat_byte(0x01)],
            data: Default::default(),
        };
        let bloom = logs_bloom([&log]);
        assert_ne!(bloom, Bloom::ZERO);
        assert!(bloom.contains_input(BloomInput::Raw(log.address.as_slice())));
        assert!(bloom.contains_input(BloomInput::Raw(log.topics[0].as_slice())));
    }
}
