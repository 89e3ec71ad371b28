//! Transaction boundary: EIP-2718 decoding, chain-id checks and signer recovery.
//!
//! Everything that touches signatures lives here so the engine crates only see
//! [`SignedTx`], a transaction with a known sender and hash.

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{SignableTransaction, Transaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::{Decodable2718, Eip2718Error, Encodable2718};
use alloy_eips::eip2930::AccessList;
use alloy_eips::Typed2718;
use alloy_primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256};

const TX_TYPE_EIP4844: u8 = 0x03;
const TX_TYPE_EIP7702: u8 = 0x04;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RecoveryError {
    #[error("unsupported transaction type")]
    UnsupportedType,
    #[error("transaction chain id {got} does not match {expected}")]
    WrongChainId { expected: u64, got: u64 },
    #[error("invalid transaction signature")]
    InvalidSignature,
    #[error("invalid rlp encoding")]
    InvalidRlp,
    #[error("trailing bytes after transaction")]
    TrailingBytes,
}

/// A decoded transaction whose sender is known, either recovered from the
/// signature or asserted by an impersonation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    hash: B256,
    sender: Address,
    envelope: TxEnvelope,
    impersonated: bool,
}

impl SignedTx {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonated
    }

    /// Placeholder `(1, 1)` for impersonated transactions.
    pub fn signature(&self) -> Signature {
        *self.envelope.signature()
    }

    pub fn nonce(&self) -> u64 {
        self.envelope.nonce()
    }

    pub fn gas_limit(&self) -> u64 {
        self.envelope.gas_limit()
    }

    pub fn to(&self) -> Option<Address> {
        match self.envelope.kind() {
            TxKind::Call(addr) => Some(addr),
            TxKind::Create => None,
        }
    }

    pub fn kind(&self) -> TxKind {
        self.envelope.kind()
    }

    pub fn value(&self) -> U256 {
        self.envelope.value()
    }

    pub fn input(&self) -> &Bytes {
        self.envelope.input()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.envelope.chain_id()
    }

    pub fn tx_type(&self) -> u8 {
        self.envelope.ty()
    }

    pub fn access_list(&self) -> AccessList {
        self.envelope.access_list().cloned().unwrap_or_default()
    }

    pub fn is_dynamic_fee(&self) -> bool {
        self.envelope.is_dynamic_fee()
    }

    /// Fee cap: `gasPrice` for legacy/2930, `maxFeePerGas` for 1559.
    pub fn max_fee_per_gas(&self) -> u128 {
        self.envelope.max_fee_per_gas()
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<u128> {
        self.envelope.max_priority_fee_per_gas()
    }

    /// Price paid per gas at `base_fee`, or `None` when the fee cap cannot cover it.
    pub fn effective_gas_price(&self, base_fee: u64) -> Option<u128> {
        let max_fee = self.max_fee_per_gas();
        let base_fee = u128::from(base_fee);
        if max_fee < base_fee {
            return None;
        }
        if !self.is_dynamic_fee() {
            return Some(max_fee);
        }
        let tip = self.max_priority_fee_per_gas().unwrap_or(0);
        Some(max_fee.min(base_fee.saturating_add(tip)))
    }

    /// Worst-case wei the sender must hold: `gas_limit * fee_cap + value`.
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit())
            .saturating_mul(U256::from(self.max_fee_per_gas()))
            .saturating_add(self.value())
    }

    pub fn encoded_2718(&self) -> Vec<u8> {
        self.envelope.encoded_2718()
    }

    pub fn encoded_len(&self) -> usize {
        self.envelope.encode_2718_len()
    }
}

/// Decodes a raw `eth_sendRawTransaction` payload and recovers its sender.
///
/// Chain id is checked before the signature so a replay from another chain
/// fails cheaply. Pre-EIP-155 legacy transactions carry no chain id and pass.
pub fn recover_raw_tx(bytes: &[u8], chain_id: u64) -> Result<SignedTx, RecoveryError> {
    if let Some(first) = bytes.first() {
        if *first == TX_TYPE_EIP4844 || *first == TX_TYPE_EIP7702 {
            return Err(RecoveryError::UnsupportedType);
        }
    }
    let envelope = TxEnvelope::decode_2718_exact(bytes).map_err(map_eip2718_error)?;
    if let Some(got) = envelope.chain_id() {
        if got != chain_id {
            return Err(RecoveryError::WrongChainId {
                expected: chain_id,
                got,
            });
        }
    }
    match envelope {
        TxEnvelope::Legacy(_) | TxEnvelope::Eip2930(_) | TxEnvelope::Eip1559(_) => {}
        _ => return Err(RecoveryError::UnsupportedType),
    }
    let sender = envelope
        .recover_signer()
        .map_err(|_| RecoveryError::InvalidSignature)?;
    Ok(SignedTx {
        hash: *envelope.tx_hash(),
        sender,
        envelope,
        impersonated: false,
    })
}

/// Fields of an unsigned transaction submitted on behalf of an impersonated account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsignedTx {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub nonce: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub access_list: AccessList,
}

/// Builds a transaction for an impersonated sender with a placeholder signature.
///
/// The hash mixes in the sender because the placeholder signature makes the
/// envelope hash identical for equal bodies from different senders.
pub fn impersonated_tx(unsigned: UnsignedTx, chain_id: u64) -> SignedTx {
    let tx = TxEip1559 {
        chain_id,
        nonce: unsigned.nonce,
        gas_limit: unsigned.gas_limit,
        max_fee_per_gas: unsigned.max_fee_per_gas,
        max_priority_fee_per_gas: unsigned.max_priority_fee_per_gas,
        to: match unsigned.to {
            Some(addr) => TxKind::Call(addr),
            None => TxKind::Create,
        },
        value: unsigned.value,
        access_list: unsigned.access_list,
        input: unsigned.input,
    };
    let signature = Signature::new(U256::from(1u8), U256::from(1u8), false);
    let envelope: TxEnvelope = tx.into_signed(signature).into();
    let mut preimage = envelope.encoded_2718();
    preimage.extend_from_slice(unsigned.from.as_slice());
    SignedTx {
        hash: keccak256(&preimage),
        sender: unsigned.from,
        envelope,
        impersonated: true,
    }
}

fn map_eip2718_error(error: Eip2718Error) -> RecoveryError {
    match error {
        Eip2718Error::UnexpectedType(_) => RecoveryError::UnsupportedType,
        Eip2718Error::RlpError(alloy_rlp::Error::UnexpectedLength) => RecoveryError::TrailingBytes,
        _ => RecoveryError::InvalidRlp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_consensus::TxLegacy;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    const CHAIN_ID: u64 = 31337;

    fn signer() -> PrivateKeySigner {
        "0x59c6995e998f97a5a0044966f094538e0d7f4f4e4d5d8dd6a8c4f9d5f8b1e8a1"
            .parse()
            .expect("signer")
    }

    fn legacy(chain_id: Option<u64>, gas_price: u128) -> TxLegacy {
        TxLegacy {
            chain_id,
            nonce: 3,
            gas_price,
            gas_limit: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::from(7u64),
            input: Bytes::new(),
        }
    }

    fn sign_legacy(tx: TxLegacy, signer: &PrivateKeySigner) -> Vec<u8> {
        let signature = signer.sign_hash_sync(&tx.signature_hash()).expect("sign");
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        envelope.encoded_2718()
    }

    #[test]
    fn recovers_sender_and_fields() {
        let signer = signer();
        let raw = sign_legacy(legacy(Some(CHAIN_ID), 5), &signer);
        let tx = recover_raw_tx(&raw, CHAIN_ID).expect("recover");
        assert_eq!(tx.sender(), signer.address());
        assert_eq!(tx.nonce(), 3);
        assert_eq!(tx.value(), U256::from(7u64));
        assert_eq!(tx.max_cost(), U256::from(21_000u64 * 5 + 7));
        assert_eq!(tx.hash(), keccak256(&raw));
        assert!(!tx.is_impersonated());
    }

    #[test]
    fn rejects_foreign_chain_id() {
        let raw = sign_legacy(legacy(Some(CHAIN_ID + 1), 5), &signer());
        let err = recover_raw_tx(&raw, CHAIN_ID).expect_err("wrong chain");
        assert_eq!(
            err,
            RecoveryError::WrongChainId {
                expected: CHAIN_ID,
                got: CHAIN_ID + 1
            }
        );
    }

    #[test]
    fn accepts_pre_eip155_legacy() {
        let raw = sign_legacy(legacy(None, 5), &signer());
        assert!(recover_raw_tx(&raw, CHAIN_ID).is_ok());
    }

    #[test]
    fn rejects_blob_prefix_and_garbage() {
        assert_eq!(
            recover_raw_tx(&[0x03, 0xc0], CHAIN_ID),
            Err(RecoveryError::UnsupportedType)
        );
        assert_eq!(
            recover_raw_tx(&[0xc1], CHAIN_ID),
            Err(RecoveryError::InvalidRlp)
        );
    }

    #[test]
    fn effective_price_respects_base_fee() {
        let tx = impersonated_tx(
            UnsignedTx {
                from: Address::repeat_byte(0x22),
                gas_limit: 21_000,
                max_fee_per_gas: 10,
                max_priority_fee_per_gas: 2,
                ..Default::default()
            },
            CHAIN_ID,
        );
        assert_eq!(tx.effective_gas_price(5), Some(7));
        assert_eq!(tx.effective_gas_price(9), Some(10));
        assert_eq!(tx.effective_gas_price(11), None);
    }

    #[test]
    fn impersonated_hash_depends_on_sender() {
        let body = UnsignedTx {
            gas_limit: 21_000,
            max_fee_per_gas: 1,
            ..Default::default()
        };
        let a = impersonated_tx(
            UnsignedTx {
                from: Address::repeat_byte(1),
                ..body.clone()
            },
            CHAIN_ID,
        );
        let b = impersonated_tx(
            UnsignedTx {
                from: Address::repeat_byte(2),
                ..body
            },
            CHAIN_ID,
        );
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.sender(), Address::repeat_byte(1));
        assert!(a.is_impersonated());
    }
}
