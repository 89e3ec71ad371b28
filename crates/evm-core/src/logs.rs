//! Log queries over mined receipts.

use alloy_primitives::{Address, B256};
use evm_db::{ChainStore, LogEntry};

/// Address/topic predicate with an inclusive block range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    /// Empty matches any address.
    pub addresses: Vec<Address>,
    /// Per position: `None` matches anything, otherwise any listed topic.
    pub topics: Vec<Option<Vec<B256>>>,
}

impl LogFilter {
    pub fn matches(&self, log: &LogEntry) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(index, wanted)| match wanted {
            None => true,
            Some(options) if options.is_empty() => true,
            Some(options) => log
                .topics
                .get(index)
                .is_some_and(|topic| options.contains(topic)),
        })
    }
}

/// A log with its position in the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub log: LogEntry,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub log_index: u64,
}

pub fn collect_logs(chain: &ChainStore, filter: &LogFilter) -> Vec<LogRecord> {
    let mut out = Vec::new();
    if filter.from_block > filter.to_block {
        return out;
    }
    for block in chain.blocks_in_range(filter.from_block, filter.to_block) {
        for receipt in chain.block_receipts(block) {
            for (offset, log) in receipt.logs.iter().enumerate() {
                if !filter.matches(log) {
                    continue;
                }
                out.push(LogRecord {
                    log: log.clone(),
                    block_number: receipt.block_number,
                    block_hash: receipt.block_hash,
                    tx_hash: receipt.tx_hash,
                    tx_index: receipt.tx_index,
                    log_index: receipt.first_log_index + offset as u64,
                });
            }
        }
    }
    out
}
