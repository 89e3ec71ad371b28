//! Conversions between engine types and wire views.

use alloy_primitives::{Address, U128, U64};
use alloy_rlp::Encodable;
use evm_core::{CallRequest, ExecOutcome, LogFilter, LogRecord, SendRequest};
use evm_db::{Block, DumpedAccount, LogEntry, StateDump, TxLocation, TxReceipt};
use evm_rpc_types::{
    EthBlockView, EthLogView, EthReceiptView, EthTxListView, EthTxView, RpcAccessListItemView,
    RpcCallObjectView, RpcLogFilterView, TevmAccountView, TevmCallResultView, TevmLogView,
};
use evm_tx::SignedTx;
use std::collections::BTreeMap;

const LEGACY_TX_TYPE: u8 = 0;

pub fn block_to_eth_view(block: &Block, full: bool) -> EthBlockView {
    let header = &block.header;
    let transactions = if full {
        EthTxListView::Full(
            block
                .transactions
                .iter()
                .enumerate()
                .map(|(index, tx)| {
                    let location = TxLocation {
                        block_number: block.number(),
                        block_hash: block.hash,
                        index,
                    };
                    tx_to_eth_view(tx, Some(location), header.base_fee_per_gas)
                })
                .collect(),
        )
    } else {
        EthTxListView::Hashes(block.tx_hashes())
    };
    let size = header.length()
        + block
            .transactions
            .iter()
            .map(SignedTx::encoded_len)
            .sum::<usize>();
    EthBlockView {
        number: U64::from(header.number),
        hash: block.hash,
        parent_hash: header.parent_hash,
        nonce: header.nonce,
        sha3_uncles: header.ommers_hash,
        logs_bloom: header.logs_bloom,
        transactions_root: header.transactions_root,
        state_root: header.state_root,
        receipts_root: header.receipts_root,
        miner: header.beneficiary,
        difficulty: header.difficulty,
        total_difficulty: header.difficulty,
        extra_data: header.extra_data.clone(),
        size: U64::from(size as u64),
        gas_limit: U64::from(header.gas_limit),
        gas_used: U64::from(header.gas_used),
        timestamp: U64::from(header.timestamp),
        mix_hash: header.mix_hash,
        base_fee_per_gas: header.base_fee_per_gas.map(U64::from),
        transactions,
        uncles: Vec::new(),
    }
}

/// `location` is `None` for pooled transactions; their price is the fee cap.
pub fn tx_to_eth_view(tx: &SignedTx, location: Option<TxLocation>, base_fee: Option<u64>) -> EthTxView {
    let signature = tx.signature();
    let parity = u64::from(signature.v());
    let v = match (tx.tx_type(), tx.chain_id()) {
        (LEGACY_TX_TYPE, Some(chain_id)) => parity + 35 + 2 * chain_id,
        (LEGACY_TX_TYPE, None) => parity + 27,
        _ => parity,
    };
    let gas_price = match (location, base_fee) {
        (Some(_), Some(base_fee)) => tx
            .effective_gas_price(base_fee)
            .unwrap_or_else(|| tx.max_fee_per_gas()),
        _ => tx.max_fee_per_gas(),
    };
    let dynamic = tx.is_dynamic_fee();
    let access_list = (tx.tx_type() != LEGACY_TX_TYPE).then(|| {
        tx.access_list()
            .0
            .into_iter()
            .map(|item| RpcAccessListItemView {
                address: item.address,
                storage_keys: item.storage_keys,
            })
            .collect()
    });
    EthTxView {
        hash: tx.hash(),
        nonce: U64::from(tx.nonce()),
        block_hash: location.map(|loc| loc.block_hash),
        block_number: location.map(|loc| U64::from(loc.block_number)),
        transaction_index: location.map(|loc| U64::from(loc.index as u64)),
        from: tx.sender(),
        to: tx.to(),
        value: tx.value(),
        gas_price: U128::from(gas_price),
        gas: U64::from(tx.gas_limit()),
        input: tx.input().clone(),
        tx_type: U64::from(tx.tx_type()),
        chain_id: tx.chain_id().map(U64::from),
        max_fee_per_gas: dynamic.then(|| U128::from(tx.max_fee_per_gas())),
        max_priority_fee_per_gas: if dynamic {
            tx.max_priority_fee_per_gas().map(U128::from)
        } else {
            None
        },
        access_list,
        v: U64::from(v),
        r: signature.r(),
        s: signature.s(),
    }
}

pub fn receipt_to_eth_view(receipt: &TxReceipt) -> EthReceiptView {
    let logs = receipt
        .logs
        .iter()
        .enumerate()
        .map(|(offset, log)| {
            log_to_eth_view(&LogRecord {
                log: log.clone(),
                block_number: receipt.block_number,
                block_hash: receipt.block_hash,
                tx_hash: receipt.tx_hash,
                tx_index: receipt.tx_index,
                log_index: receipt.first_log_index + offset as u64,
            })
        })
        .collect();
    EthReceiptView {
        transaction_hash: receipt.tx_hash,
        transaction_index: U64::from(receipt.tx_index),
        block_hash: receipt.block_hash,
        block_number: U64::from(receipt.block_number),
        from: receipt.from,
        to: receipt.to,
        cumulative_gas_used: U64::from(receipt.cumulative_gas_used),
        gas_used: U64::from(receipt.gas_used),
        effective_gas_price: U128::from(receipt.effective_gas_price),
        contract_address: receipt.contract_address,
        logs,
        logs_bloom: receipt.logs_bloom,
        tx_type: U64::from(receipt.tx_type),
        status: U64::from(u8::from(receipt.status)),
    }
}

pub fn log_to_eth_view(record: &LogRecord) -> EthLogView {
    EthLogView {
        address: record.log.address,
        topics: record.log.topics.clone(),
        data: record.log.data.clone(),
        block_number: U64::from(record.block_number),
        block_hash: record.block_hash,
        transaction_hash: record.tx_hash,
        transaction_index: U64::from(record.tx_index),
        log_index: U64::from(record.log_index),
        removed: false,
    }
}

pub fn call_request(view: &RpcCallObjectView) -> CallRequest {
    CallRequest {
        from: view.from,
        to: view.to,
        gas: view.gas.map(|gas| gas.to::<u64>()),
        gas_price: view
            .gas_price
            .or(view.max_fee_per_gas)
            .map(|price| price.to::<u128>()),
        value: view.value.unwrap_or_default(),
        data: view.calldata(),
    }
}

pub fn send_request(view: &RpcCallObjectView) -> SendRequest {
    SendRequest {
        call: call_request(view),
        nonce: view.nonce.map(|nonce| nonce.to::<u64>()),
        max_fee_per_gas: view.max_fee_per_gas.map(|fee| fee.to::<u128>()),
        max_priority_fee_per_gas: view.max_priority_fee_per_gas.map(|fee| fee.to::<u128>()),
    }
}

/// Address/topic part of a log filter; the caller resolves the range.
pub fn log_filter(view: &RpcLogFilterView, from_block: u64, to_block: u64) -> LogFilter {
    LogFilter {
        from_block,
        to_block,
        addresses: view
            .address
            .as_ref()
            .map(|address| address.to_vec())
            .unwrap_or_default(),
        topics: view
            .topics
            .as_ref()
            .map(|topics| {
                topics
                    .iter()
                    .map(|topic| topic.as_ref().map(|options| options.to_vec()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub fn call_result_view(outcome: &ExecOutcome) -> TevmCallResultView {
    let errors = if outcome.success {
        None
    } else {
        Some(vec![match outcome.halt.as_ref() {
            Some(reason) => format!("execution halted: {reason}"),
            None => "execution reverted".to_string(),
        }])
    };
    TevmCallResultView {
        raw_data: outcome.output.clone(),
        execution_gas_used: U64::from(outcome.gas_used),
        created_address: outcome.contract_address,
        logs: outcome.logs.iter().map(tevm_log).collect(),
        errors,
    }
}

fn tevm_log(log: &LogEntry) -> TevmLogView {
    TevmLogView {
        address: log.address,
        topics: log.topics.clone(),
        data: log.data.clone(),
    }
}

pub fn account_to_tevm_view(account: &DumpedAccount) -> TevmAccountView {
    TevmAccountView {
        nonce: U64::from(account.nonce),
        balance: account.balance,
        deployed_bytecode: account.code.clone(),
        storage: account.storage.clone(),
    }
}

pub fn dump_to_tevm(dump: &StateDump) -> BTreeMap<Address, TevmAccountView> {
    dump.accounts
        .iter()
        .map(|(address, account)| (*address, account_to_tevm_view(account)))
        .collect()
}

pub fn tevm_to_dump(accounts: BTreeMap<Address, TevmAccountView>) -> StateDump {
    StateDump {
        accounts: accounts
            .into_iter()
            .map(|(address, view)| {
                (
                    address,
                    DumpedAccount {
                        nonce: view.nonce.to::<u64>(),
                        balance: view.balance,
                        code: view.deployed_bytecode,
                        storage: view.storage,
                    },
                )
            })
            .collect(),
    }
}
