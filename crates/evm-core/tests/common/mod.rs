//! evm-core integration test helpers: signers, signed transactions and a
//! funded dev node.

#![allow(dead_code)]

use alloy_consensus::{Header, SignableTransaction, TxEip1559, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use evm_core::{MiningMode, Node, NodeConfig};
use evm_db::{AccountState, Block, ChainStore, StateManager};
use evm_tx::{recover_raw_tx, SignedTx};

pub const CHAIN_ID: u64 = 31337;
pub const GWEI: u128 = 1_000_000_000;
pub const GENESIS_TIME: u64 = 1_700_000_000;
pub const DEV_KEY: &str = "0x59c6995e998f97a5a0044966f094538e0d7f4f4e4d5d8dd6a8c4f9d5f8b1e8a1";

/// PUSH1 0 PUSH1 0 REVERT
pub const REVERT_CODE: [u8; 5] = [0x60, 0x00, 0x60, 0x00, 0xfd];
/// PUSH1 0x2a PUSH1 0 SSTORE STOP
pub const STORE_CODE: [u8; 6] = [0x60, 0x2a, 0x60, 0x00, 0x55, 0x00];
/// PUSH1 1 PUSH1 0 LOG0 STOP
pub const LOG_CODE: [u8; 6] = [0x60, 0x01, 0x60, 0x00, 0xa0, 0x00];

pub fn signer(seed: u8) -> PrivateKeySigner {
    if seed == 0 {
        return DEV_KEY.parse().expect("signer");
    }
    PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).expect("signer")
}

pub fn recipient() -> Address {
    Address::from([0x11u8; 20])
}

fn sign_encoded<T>(tx: T, signer: &PrivateKeySigner) -> Vec<u8>
where
    T: alloy_consensus::transaction::RlpEcdsaEncodableTx
        + alloy_eips::Typed2718
        + SignableTransaction<Signature>
        + Send
        + Sync,
{
    let hash = tx.signature_hash();
    let signature = signer.sign_hash_sync(&hash).expect("sign");
    let signed = tx.into_signed(signature);
    signed.encoded_2718()
}

pub fn raw_eip1559(
    signer: &PrivateKeySigner,
    nonce: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    gas_limit: u64,
    to: Address,
) -> Vec<u8> {
    let tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        to: TxKind::Call(to),
        value: U256::from(1u64),
        access_list: Default::default(),
        input: Bytes::new(),
    };
    sign_encoded(tx, signer)
}

pub fn eip1559(
    signer: &PrivateKeySigner,
    nonce: u64,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    gas_limit: u64,
    to: Address,
) -> SignedTx {
    let raw = raw_eip1559(signer, nonce, max_fee_per_gas, max_priority_fee_per_gas, gas_limit, to);
    recover_raw_tx(&raw, CHAIN_ID).expect("recover")
}

/// Plain 21k transfer paying `gwei` as both fee cap and tip.
pub fn transfer(signer: &PrivateKeySigner, nonce: u64, gwei: u128) -> SignedTx {
    eip1559(signer, nonce, gwei * GWEI, gwei * GWEI, 21_000, recipient())
}

pub fn legacy(signer: &PrivateKeySigner, nonce: u64, gas_price: u128) -> SignedTx {
    let tx = TxLegacy {
        chain_id: Some(CHAIN_ID),
        nonce,
        gas_price,
        gas_limit: 21_000,
        to: TxKind::Call(recipient()),
        value: U256::ZERO,
        input: Bytes::new(),
    };
    recover_raw_tx(&sign_encoded(tx, signer), CHAIN_ID).expect("recover")
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18u64))
}

/// Manual-mining dev config with each signer funded with 100 ether.
pub fn dev_config(seeds: &[u8]) -> NodeConfig {
    let mut config = NodeConfig {
        chain_id: CHAIN_ID,
        genesis_timestamp: Some(GENESIS_TIME),
        mining: MiningMode::Manual,
        ..Default::default()
    };
    for seed in seeds {
        config
            .genesis_accounts
            .insert(signer(*seed).address(), ether(100));
    }
    config
}

pub fn dev_node(seeds: &[u8]) -> Node {
    Node::new(dev_config(seeds)).expect("node")
}

/// Bare state and chain with `funded` accounts, for driving the builder directly.
pub fn genesis(funded: &[Address]) -> (StateManager, ChainStore) {
    let mut state = StateManager::new();
    for address in funded {
        state.put_account(*address, AccountState::new(0, ether(100)));
    }
    let state_root = state.commit_state_root().expect("root");
    let header = Header {
        number: 0,
        gas_limit: 30_000_000,
        timestamp: GENESIS_TIME,
        base_fee_per_gas: Some(GWEI as u64),
        state_root,
        ..Default::default()
    };
    (state, ChainStore::new(Block::new(header, Vec::new())))
}
