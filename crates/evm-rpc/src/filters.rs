//! Filter Registry: installed log, block and pending-transaction filters and
//! the cursors that make polling return only new items.

use crate::error::FilterError;
use alloy_primitives::B256;
use evm_core::{LogFilter, LogRecord, Node, PoolEvent};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

/// Block range of a log filter. `None` bounds follow the head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogCriteria {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    /// Addresses and topics; its range is replaced at query time.
    pub predicate: LogFilter,
}

impl LogCriteria {
    fn bounded(&self, from: u64, to: u64) -> LogFilter {
        LogFilter {
            from_block: from,
            to_block: to,
            ..self.predicate.clone()
        }
    }
}

pub enum FilterKind {
    Logs(LogCriteria),
    Blocks,
    PendingTransactions(broadcast::Receiver<PoolEvent>),
}

enum FilterData {
    Logs {
        criteria: LogCriteria,
        next_block: u64,
    },
    Blocks {
        next_block: u64,
    },
    PendingTransactions(broadcast::Receiver<PoolEvent>),
}

struct Filter {
    data: FilterData,
    last_poll: Instant,
}

/// Items delivered by one poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterChanges {
    Logs(Vec<LogRecord>),
    Hashes(Vec<B256>),
}

pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
    expiry: Duration,
}

impl FilterRegistry {
    pub fn new(expiry: Duration) -> Self {
        Self {
            filters: HashMap::new(),
            expiry,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Registers a filter whose first poll covers blocks after `head`.
    pub fn install(&mut self, kind: FilterKind, head: u64, now: Instant) -> String {
        let id = next_filter_id();
        let data = match kind {
            FilterKind::Logs(criteria) => FilterData::Logs {
                criteria,
                next_block: head + 1,
            },
            FilterKind::Blocks => FilterData::Blocks {
                next_block: head + 1,
            },
            FilterKind::PendingTransactions(events) => FilterData::PendingTransactions(events),
        };
        debug!(filter_id = %id, head, "filters: installed");
        self.filters.insert(
            id.clone(),
            Filter {
                data,
                last_poll: now,
            },
        );
        id
    }

    /// `false` when `id` is unknown or already removed.
    pub fn uninstall(&mut self, id: &str) -> bool {
        let removed = self.filters.remove(&normalize(id)).is_some();
        debug!(filter_id = %id, removed, "filters: uninstall");
        removed
    }

    /// Items since the previous poll.
    pub fn poll(&mut self, id: &str, node: &Node, now: Instant) -> Result<FilterChanges, FilterError> {
        let filter = self
            .filters
            .get_mut(&normalize(id))
            .ok_or_else(|| FilterError::NotFound(id.to_string()))?;
        filter.last_poll = now;
        let head = node.block_number();
        let changes = match &mut filter.data {
            FilterData::Logs {
                criteria,
                next_block,
            } => {
                let from = criteria.from_block.map_or(*next_block, |from| from.max(*next_block));
                let to = criteria.to_block.map_or(head, |to| to.min(head));
                let logs = if from <= to {
                    node.logs(&criteria.bounded(from, to))
                } else {
                    Vec::new()
                };
                *next_block = head + 1;
                FilterChanges::Logs(logs)
            }
            FilterData::Blocks { next_block } => {
                let hashes = (*next_block..=head)
                    .filter_map(|number| node.chain().block_by_number(number))
                    .map(|block| block.hash)
                    .collect();
                *next_block = head + 1;
                FilterChanges::Hashes(hashes)
            }
            FilterData::PendingTransactions(events) => {
                FilterChanges::Hashes(drain_added(events, id))
            }
        };
        Ok(changes)
    }

    /// Every log matching a log filter's criteria, ignoring its cursor.
    pub fn filter_logs(&mut self, id: &str, node: &Node, now: Instant) -> Result<Vec<LogRecord>, FilterError> {
        let filter = self
            .filters
            .get_mut(&normalize(id))
            .ok_or_else(|| FilterError::NotFound(id.to_string()))?;
        filter.last_poll = now;
        let FilterData::Logs { criteria, .. } = &filter.data else {
            return Err(FilterError::NotFound(id.to_string()));
        };
        let head = node.block_number();
        let from = criteria.from_block.unwrap_or(head);
        let to = criteria.to_block.map_or(head, |to| to.min(head));
        if from > to {
            return Ok(Vec::new());
        }
        Ok(node.logs(&criteria.bounded(from, to)))
    }

    /// Pulls block cursors back to `head` after history was rewritten, so
    /// blocks mined again at the same heights are reported.
    pub fn rewind(&mut self, head: u64) {
        for filter in self.filters.values_mut() {
            match &mut filter.data {
                FilterData::Logs { next_block, .. } | FilterData::Blocks { next_block } => {
                    *next_block = (*next_block).min(head + 1);
                }
                FilterData::PendingTransactions(_) => {}
            }
        }
    }

    /// Drops filters idle for longer than the expiry. Returns how many went.
    pub fn expire_idle(&mut self, now: Instant) -> usize {
        let before = self.filters.len();
        let expiry = self.expiry;
        self.filters
            .retain(|_, filter| now.saturating_duration_since(filter.last_poll) <= expiry);
        let expired = before - self.filters.len();
        if expired > 0 {
            debug!(expired, "filters: expired idle filters");
        }
        expired
    }
}

fn drain_added(events: &mut broadcast::Receiver<PoolEvent>, id: &str) -> Vec<B256> {
    let mut hashes = Vec::new();
    loop {
        match events.try_recv() {
            Ok(PoolEvent::Added(hash)) => hashes.push(hash),
            Ok(PoolEvent::Removed(_)) => {}
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(filter_id = %id, skipped, "filters: pending transaction events dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    hashes
}

/// 16 random bytes as `0x`-prefixed hex.
fn next_filter_id() -> String {
    format!("0x{}", hex::encode(rand::random::<[u8; 16]>()))
}

fn normalize(id: &str) -> String {
    id.to_ascii_lowercase()
}
