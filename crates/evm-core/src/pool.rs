//! Transaction Pool: per-sender nonce queues, pending/queued
//! classification, replace-by-nonce and price/nonce ordered selection.

use crate::config::{PoolConfig, TX_BASE_GAS};
use crate::error::PoolError;
use alloy_primitives::{Address, B256, U256};
use evm_db::{Block, StateRead};
use evm_tx::SignedTx;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Next in line for its sender, or part of a gapless run after it.
    Pending,
    /// Waiting for a lower nonce to arrive.
    Queued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    Added(B256),
    Removed(B256),
}

/// Sender account as seen at admission time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenderInfo {
    pub nonce: u64,
    pub balance: U256,
}

#[derive(Clone, Debug)]
struct PooledTx {
    tx: SignedTx,
    seq: u64,
}

#[derive(Clone, Debug, Default)]
struct SenderQueue {
    /// Nonce the chain expects next from this sender.
    state_nonce: u64,
    txs: BTreeMap<u64, PooledTx>,
}

impl SenderQueue {
    /// Last nonce of the gapless run starting at `state_nonce`, exclusive.
    fn pending_end(&self) -> u64 {
        let mut next = self.state_nonce;
        for nonce in self.txs.range(self.state_nonce..).map(|(n, _)| *n) {
            if nonce != next {
                break;
            }
            next += 1;
        }
        next
    }

    fn status(&self, nonce: u64) -> TxStatus {
        if nonce >= self.state_nonce && nonce < self.pending_end() {
            TxStatus::Pending
        } else {
            TxStatus::Queued
        }
    }

    fn pending(&self) -> impl Iterator<Item = &PooledTx> {
        self.txs
            .range(self.state_nonce..self.pending_end())
            .map(|(_, pooled)| pooled)
    }
}

/// Snapshot for `txpool_content`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolContent {
    pub pending: BTreeMap<Address, BTreeMap<u64, SignedTx>>,
    pub queued: BTreeMap<Address, BTreeMap<u64, SignedTx>>,
}

#[derive(Debug)]
pub struct TxPool {
    config: PoolConfig,
    block_gas_limit: u64,
    senders: BTreeMap<Address, SenderQueue>,
    by_hash: HashMap<B256, (Address, u64)>,
    next_seq: u64,
    events: broadcast::Sender<PoolEvent>,
}

impl TxPool {
    pub fn new(config: PoolConfig, block_gas_limit: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            block_gas_limit,
            senders: BTreeMap::new(),
            by_hash: HashMap::new(),
            next_seq: 0,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &B256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &B256) -> Option<&SignedTx> {
        let (sender, nonce) = self.by_hash.get(hash)?;
        self.senders
            .get(sender)?
            .txs
            .get(nonce)
            .map(|pooled| &pooled.tx)
    }

    pub fn status(&self, hash: &B256) -> Option<TxStatus> {
        let (sender, nonce) = self.by_hash.get(hash)?;
        self.senders.get(sender).map(|queue| queue.status(*nonce))
    }

    /// Every pooled transaction from `sender`, in nonce order.
    pub fn get_by_sender(&self, sender: &Address) -> Vec<SignedTx> {
        self.senders
            .get(sender)
            .map(|queue| queue.txs.values().map(|p| p.tx.clone()).collect())
            .unwrap_or_default()
    }

    /// Next nonce `sender` would use, counting pending pool entries.
    pub fn next_nonce(&self, sender: &Address, state_nonce: u64) -> u64 {
        match self.senders.get(sender) {
            Some(queue) => queue.pending_end().max(state_nonce),
            None => state_nonce,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.senders.values().map(|q| q.pending().count()).sum()
    }

    pub fn queued_count(&self) -> usize {
        self.len() - self.pending_count()
    }

    pub fn content(&self) -> PoolContent {
        let mut content = PoolContent::default();
        for (sender, queue) in self.senders.iter() {
            for (nonce, pooled) in queue.txs.iter() {
                let bucket = match queue.status(*nonce) {
                    TxStatus::Pending => &mut content.pending,
                    TxStatus::Queued => &mut content.queued,
                };
                bucket
                    .entry(*sender)
                    .or_default()
                    .insert(*nonce, pooled.tx.clone());
            }
        }
        content
    }

    /// Admits `tx`, replacing a same-nonce entry from the same sender when
    /// the new one pays enough more.
    pub fn add(&mut self, tx: SignedTx, account: SenderInfo) -> Result<B256, PoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown(hash));
        }
        self.validate(&tx, account)?;

        let sender = tx.sender();
        let nonce = tx.nonce();
        let replaced = match self.senders.get(&sender).and_then(|q| q.txs.get(&nonce)) {
            Some(existing) => {
                if !self.outbids(&tx, &existing.tx) {
                    return Err(PoolError::ReplacementUnderpriced);
                }
                Some(existing.tx.hash())
            }
            None => {
                if self.len() >= self.config.max_txs {
                    return Err(PoolError::PoolFull);
                }
                let held = self.senders.get(&sender).map_or(0, |q| q.txs.len());
                if held >= self.config.max_txs_per_account {
                    return Err(PoolError::SenderLimit(held));
                }
                None
            }
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let queue = self.senders.entry(sender).or_default();
        queue.state_nonce = account.nonce;
        queue.txs.insert(nonce, PooledTx { tx, seq });
        self.by_hash.insert(hash, (sender, nonce));

        if let Some(old) = replaced {
            self.by_hash.remove(&old);
            info!(tx_hash = %hash, replaced = %old, sender = %sender, nonce, "pool: transaction replaced");
            self.emit(PoolEvent::Removed(old));
        } else {
            debug!(tx_hash = %hash, sender = %sender, nonce, "pool: transaction added");
        }
        self.emit(PoolEvent::Added(hash));
        Ok(hash)
    }

    fn validate(&self, tx: &SignedTx, account: SenderInfo) -> Result<(), PoolError> {
        let size = tx.input().len();
        if size > self.config.max_tx_data_bytes {
            return Err(PoolError::Oversized {
                size,
                limit: self.config.max_tx_data_bytes,
            });
        }
        if tx.gas_limit() < TX_BASE_GAS || tx.gas_limit() > self.block_gas_limit {
            return Err(PoolError::InvalidGasLimit {
                gas_limit: tx.gas_limit(),
                min: TX_BASE_GAS,
                max: self.block_gas_limit,
            });
        }
        if let Some(tip) = tx.max_priority_fee_per_gas() {
            if tip > tx.max_fee_per_gas() {
                return Err(PoolError::TipAboveFeeCap);
            }
        }
        if tx.nonce() < account.nonce {
            return Err(PoolError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce(),
            });
        }
        let cost = tx.max_cost();
        if account.balance < cost {
            return Err(PoolError::InsufficientBalance {
                balance: account.balance,
                cost,
            });
        }
        Ok(())
    }

    fn outbids(&self, new: &SignedTx, old: &SignedTx) -> bool {
        let bump = |value: u128| {
            value
                .saturating_mul(100 + u128::from(self.config.price_bump_percent))
                / 100
        };
        let new_tip = new.max_priority_fee_per_gas().unwrap_or(new.max_fee_per_gas());
        let old_tip = old.max_priority_fee_per_gas().unwrap_or(old.max_fee_per_gas());
        new.max_fee_per_gas() >= bump(old.max_fee_per_gas()) && new_tip >= bump(old_tip)
    }

    pub fn remove(&mut self, hash: &B256) -> Result<SignedTx, PoolError> {
        let (sender, nonce) = self
            .by_hash
            .remove(hash)
            .ok_or(PoolError::NotInPool(*hash))?;
        let pooled = self
            .senders
            .get_mut(&sender)
            .and_then(|queue| queue.txs.remove(&nonce))
            .ok_or(PoolError::NotInPool(*hash))?;
        if self.senders.get(&sender).is_some_and(|q| q.txs.is_empty()) {
            self.senders.remove(&sender);
        }
        debug!(tx_hash = %hash, "pool: transaction removed");
        self.emit(PoolEvent::Removed(*hash));
        Ok(pooled.tx)
    }

    pub fn clear(&mut self) {
        let hashes: Vec<B256> = self.by_hash.keys().copied().collect();
        for hash in hashes {
            let _ = self.remove(&hash);
        }
    }

    /// Drops entries below `state_nonce` and records it for classification.
    pub fn sync_sender(&mut self, sender: Address, state_nonce: u64) {
        let Some(queue) = self.senders.get_mut(&sender) else {
            return;
        };
        queue.state_nonce = state_nonce;
        let stale: Vec<B256> = queue
            .txs
            .range(..state_nonce)
            .map(|(_, p)| p.tx.hash())
            .collect();
        for hash in stale {
            let _ = self.remove(&hash);
        }
    }

    /// Re-reads every sender's nonce, e.g. after state was rewound.
    pub fn resync<S: StateRead>(&mut self, state: &S) {
        let senders: Vec<Address> = self.senders.keys().copied().collect();
        for sender in senders {
            if let Ok(nonce) = state.nonce_of(&sender) {
                self.sync_sender(sender, nonce);
            }
        }
    }

    /// Removes the block's transactions and any entry their nonces made stale.
    pub fn on_block_added<S: StateRead>(&mut self, block: &Block, state: &S) -> Vec<B256> {
        let mut removed = Vec::new();
        let mut touched: BTreeMap<Address, u64> = BTreeMap::new();
        for tx in block.transactions.iter() {
            if self.remove(&tx.hash()).is_ok() {
                removed.push(tx.hash());
            }
            let next = touched.entry(tx.sender()).or_default();
            *next = (*next).max(tx.nonce() + 1);
        }
        for (sender, mined_next) in touched {
            let state_nonce = state.nonce_of(&sender).unwrap_or(mined_next);
            self.sync_sender(sender, state_nonce);
        }
        removed
    }

    /// Puts transactions from `removed` blocks back unless their nonce was
    /// consumed in the surviving chain. Returns the re-queued hashes.
    pub fn on_chain_reorganization<S: StateRead>(
        &mut self,
        removed: &[Block],
        added: &[Block],
        state: &S,
    ) -> Vec<B256> {
        let kept: std::collections::HashSet<B256> = added
            .iter()
            .flat_map(|block| block.transactions.iter().map(SignedTx::hash))
            .collect();
        let mut requeued = Vec::new();
        let mut senders = BTreeMap::new();
        for tx in removed.iter().flat_map(|block| block.transactions.iter()) {
            let sender = tx.sender();
            let state_nonce = match state.nonce_of(&sender) {
                Ok(nonce) => nonce,
                Err(_) => continue,
            };
            senders.insert(sender, state_nonce);
            if kept.contains(&tx.hash()) || tx.nonce() < state_nonce {
                continue;
            }
            let balance = state.balance_of(&sender).unwrap_or(U256::MAX);
            let account = SenderInfo {
                nonce: state_nonce,
                balance,
            };
            if self.add(tx.clone(), account).is_ok() {
                requeued.push(tx.hash());
            }
        }
        for (sender, nonce) in senders {
            self.sync_sender(sender, nonce);
        }
        if !requeued.is_empty() {
            info!(count = requeued.len(), "pool: transactions re-queued after reorg");
        }
        requeued
    }

    /// Pending transactions in mining order at `base_fee`.
    pub fn txs_by_price_and_nonce(&self, base_fee: u64) -> TxsByPriceAndNonce {
        let mut by_sender = HashMap::new();
        for (sender, queue) in self.senders.iter() {
            let run: VecDeque<(SignedTx, u64)> =
                queue.pending().map(|p| (p.tx.clone(), p.seq)).collect();
            if !run.is_empty() {
                by_sender.insert(*sender, run);
            }
        }
        TxsByPriceAndNonce::new(by_sender, base_fee)
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[derive(Clone, Debug)]
struct HeapEntry {
    price: u128,
    seq: u64,
    tx: SignedTx,
}

impl HeapEntry {
    fn key(&self) -> (u128, Reverse<u64>) {
        (self.price, Reverse(self.seq))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Max-heap over each sender's lowest unsent nonce, keyed by effective
/// gas price then arrival order. Senders whose head cannot pay the base
/// fee are left out.
#[derive(Debug)]
pub struct TxsByPriceAndNonce {
    heads: BinaryHeap<HeapEntry>,
    rest: HashMap<Address, VecDeque<(SignedTx, u64)>>,
    base_fee: u64,
}

impl TxsByPriceAndNonce {
    fn new(by_sender: HashMap<Address, VecDeque<(SignedTx, u64)>>, base_fee: u64) -> Self {
        let mut ordered = Self {
            heads: BinaryHeap::new(),
            rest: by_sender,
            base_fee,
        };
        let senders: Vec<Address> = ordered.rest.keys().copied().collect();
        for sender in senders {
            ordered.push_next(&sender);
        }
        ordered
    }

    fn push_next(&mut self, sender: &Address) {
        let Some(queue) = self.rest.get_mut(sender) else {
            return;
        };
        let Some((tx, seq)) = queue.pop_front() else {
            self.rest.remove(sender);
            return;
        };
        match tx.effective_gas_price(self.base_fee) {
            Some(price) => self.heads.push(HeapEntry { price, seq, tx }),
            None => {
                self.rest.remove(sender);
            }
        }
    }

    pub fn peek(&self) -> Option<&SignedTx> {
        self.heads.peek().map(|entry| &entry.tx)
    }

    /// Accepts the head and exposes its sender's next nonce.
    pub fn shift(&mut self) -> Option<SignedTx> {
        let entry = self.heads.pop()?;
        self.push_next(&entry.tx.sender());
        Some(entry.tx)
    }

    /// Discards the head and every later transaction from its sender.
    pub fn pop(&mut self) -> Option<SignedTx> {
        let entry = self.heads.pop()?;
        self.rest.remove(&entry.tx.sender());
        Some(entry.tx)
    }
}

impl Iterator for TxsByPriceAndNonce {
    type Item = SignedTx;

    fn next(&mut self) -> Option<SignedTx> {
        self.shift()
    }
}
