//! State Manager: accounts, storage and code behind nested checkpoints.
//!
//! Reads walk the open checkpoints from innermost to outermost, then the
//! committed layer, then (fork mode) the remote cache. A miss in fork mode
//! surfaces as [`StateError::Missing`] so the caller can fetch and retry;
//! nothing here performs I/O.

use crate::error::StateError;
use crate::overlay::OverlayMap;
use crate::trie;
use crate::types::{AccountState, StateKey, KECCAK_EMPTY};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

pub trait StateRead {
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError>;
    fn storage(&self, address: &Address, slot: &B256) -> Result<U256, StateError>;
    /// Unknown hashes read as empty code.
    fn code(&self, code_hash: &B256) -> Result<Bytes, StateError>;

    fn code_of(&self, address: &Address) -> Result<Bytes, StateError> {
        match self.account(address)? {
            Some(account) if account.has_code() => self.code(&account.code_hash),
            _ => Ok(Bytes::new()),
        }
    }

    fn nonce_of(&self, address: &Address) -> Result<u64, StateError> {
        Ok(self.account(address)?.map(|a| a.nonce).unwrap_or(0))
    }

    fn balance_of(&self, address: &Address) -> Result<U256, StateError> {
        Ok(self
            .account(address)?
            .map(|a| a.balance)
            .unwrap_or(U256::ZERO))
    }
}

enum Lookup<T> {
    Hit(T),
    Gone,
    Miss,
}

/// Committed state. Tombstones (`None`) and wiped owners shadow the remote cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Layer {
    accounts: BTreeMap<Address, Option<AccountState>>,
    storage: BTreeMap<(Address, B256), U256>,
    codes: BTreeMap<B256, Bytes>,
    wiped: BTreeSet<Address>,
}

impl Layer {
    fn account(&self, address: &Address) -> Lookup<AccountState> {
        match self.accounts.get(address) {
            Some(Some(account)) => Lookup::Hit(*account),
            Some(None) => Lookup::Gone,
            None => Lookup::Miss,
        }
    }

    fn storage(&self, address: &Address, slot: &B256) -> Lookup<U256> {
        if let Some(value) = self.storage.get(&(*address, *slot)) {
            return Lookup::Hit(*value);
        }
        if self.wiped.contains(address) {
            return Lookup::Gone;
        }
        Lookup::Miss
    }

    fn wipe(&mut self, address: Address) {
        let keys: Vec<(Address, B256)> = self
            .storage
            .range((address, B256::ZERO)..=(address, B256::repeat_byte(0xff)))
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.storage.remove(&key);
        }
        self.wiped.insert(address);
    }

    fn absorb(&mut self, mut checkpoint: Checkpoint) {
        for address in std::mem::take(&mut checkpoint.wiped) {
            self.wipe(address);
        }
        checkpoint
            .accounts
            .drain_to(|address, account| {
                self.accounts.insert(address, account);
            });
        checkpoint.storage.drain_to(|key, value| {
            self.storage.insert(key, value.unwrap_or(U256::ZERO));
        });
        checkpoint.codes.drain_to(|hash, code| {
            if let Some(code) = code {
                self.codes.insert(hash, code);
            }
        });
    }
}

#[derive(Debug, Default)]
struct Checkpoint {
    accounts: OverlayMap<Address, AccountState>,
    storage: OverlayMap<(Address, B256), U256>,
    codes: OverlayMap<B256, Bytes>,
    wiped: BTreeSet<Address>,
}

impl Checkpoint {
    fn account(&self, address: &Address) -> Lookup<AccountState> {
        match self.accounts.get(address) {
            Some(Some(account)) => Lookup::Hit(*account),
            Some(None) => Lookup::Gone,
            None => Lookup::Miss,
        }
    }

    fn storage(&self, address: &Address, slot: &B256) -> Lookup<U256> {
        match self.storage.get(&(*address, *slot)) {
            Some(value) => Lookup::Hit(value.unwrap_or(U256::ZERO)),
            None if self.wiped.contains(address) => Lookup::Gone,
            None => Lookup::Miss,
        }
    }

    fn wipe(&mut self, address: Address) {
        self.storage.retain(|(owner, _)| *owner != address);
        self.wiped.insert(address);
    }

    fn merge_into(self, parent: &mut Checkpoint) {
        for address in self.wiped {
            parent.wipe(address);
        }
        self.accounts.merge_into(&mut parent.accounts);
        self.storage.merge_into(&mut parent.storage);
        self.codes.merge_into(&mut parent.codes);
    }

    fn code(&self, code_hash: &B256) -> Option<Bytes> {
        self.codes.get(code_hash).and_then(Clone::clone)
    }
}

/// Values fetched from the fork source, valid for the whole session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteCache {
    accounts: BTreeMap<Address, Option<AccountState>>,
    storage: BTreeMap<(Address, B256), U256>,
    codes: BTreeMap<B256, Bytes>,
}

impl RemoteCache {
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        self.accounts
            .get(address)
            .copied()
            .ok_or(StateError::Missing(StateKey::Account(*address)))
    }

    fn storage(&self, address: &Address, slot: &B256) -> Result<U256, StateError> {
        if let Some(value) = self.storage.get(&(*address, *slot)) {
            return Ok(*value);
        }
        // Nothing to fetch for an account the remote does not know.
        if let Some(None) = self.accounts.get(address) {
            return Ok(U256::ZERO);
        }
        Err(StateError::Missing(StateKey::Storage(*address, *slot)))
    }

    pub fn len(&self) -> usize {
        self.accounts.len() + self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`StateManager::checkpoint`]; it names a nesting depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointId(usize);

impl CheckpointId {
    pub fn depth(self) -> usize {
        self.0
    }
}

/// Flattened view of every live account, used for roots and dumps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatState {
    pub accounts: BTreeMap<Address, AccountState>,
    pub storage: BTreeMap<Address, BTreeMap<B256, U256>>,
    pub codes: BTreeMap<B256, Bytes>,
}

impl FlatState {
    fn put_account(&mut self, address: Address, account: Option<AccountState>) {
        match account {
            Some(account) => {
                self.accounts.insert(address, account);
            }
            None => {
                self.accounts.remove(&address);
                self.storage.remove(&address);
            }
        }
    }

    fn put_storage(&mut self, address: Address, slot: B256, value: U256) {
        let slots = self.storage.entry(address).or_default();
        if value.is_zero() {
            slots.remove(&slot);
        } else {
            slots.insert(slot, value);
        }
    }

    fn apply_layer(&mut self, layer: &Layer) {
        for address in layer.wiped.iter() {
            self.storage.remove(address);
        }
        for (address, account) in layer.accounts.iter() {
            self.put_account(*address, *account);
        }
        for ((address, slot), value) in layer.storage.iter() {
            self.put_storage(*address, *slot, *value);
        }
        self.codes
            .extend(layer.codes.iter().map(|(h, c)| (*h, c.clone())));
    }

    fn apply_checkpoint(&mut self, checkpoint: &Checkpoint) {
        for address in checkpoint.wiped.iter() {
            self.storage.remove(address);
        }
        for (address, account) in checkpoint.accounts.iter() {
            self.put_account(*address, *account);
        }
        for ((address, slot), value) in checkpoint.storage.iter() {
            self.put_storage(*address, *slot, value.unwrap_or(U256::ZERO));
        }
        for (hash, code) in checkpoint.codes.iter() {
            if let Some(code) = code {
                self.codes.insert(*hash, code.clone());
            }
        }
    }

    fn finish(mut self) -> Self {
        let accounts = &self.accounts;
        self.storage
            .retain(|address, slots| !slots.is_empty() && accounts.contains_key(address));
        self
    }

    pub fn state_root(&self) -> B256 {
        trie::state_root(&self.accounts, &self.storage)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpedAccount {
    pub nonce: u64,
    pub balance: U256,
    #[serde(default)]
    pub code: Bytes,
    #[serde(default)]
    pub storage: BTreeMap<B256, U256>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDump {
    pub accounts: BTreeMap<Address, DumpedAccount>,
}

#[derive(Debug, Default)]
pub struct StateManager {
    base: Layer,
    checkpoints: Vec<Checkpoint>,
    remote: Option<RemoteCache>,
    roots: HashMap<B256, Layer>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager whose misses are served from a fork source.
    pub fn forked() -> Self {
        Self {
            remote: Some(RemoteCache::default()),
            ..Self::default()
        }
    }

    pub fn is_fork(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote_cache(&self) -> Option<&RemoteCache> {
        self.remote.as_ref()
    }

    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        for checkpoint in self.checkpoints.iter().rev() {
            match checkpoint.account(address) {
                Lookup::Hit(account) => return Ok(Some(account)),
                Lookup::Gone => return Ok(None),
                Lookup::Miss => {}
            }
        }
        read_account(&self.base, self.remote.as_ref(), address)
    }

    pub fn get_storage(&self, address: &Address, slot: &B256) -> Result<U256, StateError> {
        for checkpoint in self.checkpoints.iter().rev() {
            match checkpoint.storage(address, slot) {
                Lookup::Hit(value) => return Ok(value),
                Lookup::Gone => return Ok(U256::ZERO),
                Lookup::Miss => {}
            }
        }
        read_storage(&self.base, self.remote.as_ref(), address, slot)
    }

    pub fn get_code(&self, code_hash: &B256) -> Result<Bytes, StateError> {
        if *code_hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        for checkpoint in self.checkpoints.iter().rev() {
            if let Some(code) = checkpoint.code(code_hash) {
                return Ok(code);
            }
        }
        Ok(read_code(&self.base, self.remote.as_ref(), code_hash))
    }

    pub fn put_account(&mut self, address: Address, account: AccountState) {
        match self.checkpoints.last_mut() {
            Some(top) => top.accounts.set(address, account),
            None => {
                self.base.accounts.insert(address, Some(account));
            }
        }
    }

    /// Removes the account and clears its storage.
    pub fn delete_account(&mut self, address: Address) {
        match self.checkpoints.last_mut() {
            Some(top) => {
                top.accounts.delete(address);
                top.wipe(address);
            }
            None => {
                self.base.accounts.insert(address, None);
                self.base.wipe(address);
            }
        }
    }

    /// Zero is stored explicitly so it shadows a remote value.
    pub fn put_storage(&mut self, address: Address, slot: B256, value: U256) {
        match self.checkpoints.last_mut() {
            Some(top) => top.storage.set((address, slot), value),
            None => {
                self.base.storage.insert((address, slot), value);
            }
        }
    }

    pub fn clear_storage(&mut self, address: Address) {
        match self.checkpoints.last_mut() {
            Some(top) => top.wipe(address),
            None => self.base.wipe(address),
        }
    }

    pub fn insert_code(&mut self, code: Bytes) -> B256 {
        if code.is_empty() {
            return KECCAK_EMPTY;
        }
        let hash = keccak256(&code);
        match self.checkpoints.last_mut() {
            Some(top) => top.codes.set(hash, code),
            None => {
                self.base.codes.insert(hash, code);
            }
        }
        hash
    }

    pub fn put_code(&mut self, address: Address, code: Bytes) -> Result<(), StateError> {
        let code_hash = self.insert_code(code);
        let mut account = self.get_account(&address)?.unwrap_or_default();
        account.code_hash = code_hash;
        self.put_account(address, account);
        Ok(())
    }

    /// Read-modify-write on one account, creating it when absent.
    pub fn modify_account<F>(&mut self, address: Address, f: F) -> Result<AccountState, StateError>
    where
        F: FnOnce(&mut AccountState),
    {
        let mut account = self.get_account(&address)?.unwrap_or_default();
        f(&mut account);
        self.put_account(address, account);
        Ok(account)
    }

    pub fn checkpoint(&mut self) -> CheckpointId {
        self.checkpoints.push(Checkpoint::default());
        CheckpointId(self.checkpoints.len())
    }

    fn pop_checked(&mut self, id: CheckpointId) -> Result<Checkpoint, StateError> {
        let depth = self.checkpoints.len();
        if id.0 != depth || depth == 0 {
            return Err(StateError::UnbalancedCheckpoint { got: id.0, depth });
        }
        self.checkpoints
            .pop()
            .ok_or(StateError::UnbalancedCheckpoint { got: id.0, depth })
    }

    /// Folds the innermost checkpoint into its parent.
    pub fn commit(&mut self, id: CheckpointId) -> Result<(), StateError> {
        let top = self.pop_checked(id)?;
        match self.checkpoints.last_mut() {
            Some(parent) => top.merge_into(parent),
            None => self.base.absorb(top),
        }
        Ok(())
    }

    /// Discards the innermost checkpoint.
    pub fn revert(&mut self, id: CheckpointId) -> Result<(), StateError> {
        self.pop_checked(id)?;
        Ok(())
    }

    fn flatten_local(&self) -> FlatState {
        let mut flat = FlatState::default();
        flat.apply_layer(&self.base);
        for checkpoint in self.checkpoints.iter() {
            flat.apply_checkpoint(checkpoint);
        }
        flat.finish()
    }

    /// Every live account including values cached from the fork source.
    pub fn flatten(&self) -> FlatState {
        let mut flat = FlatState::default();
        if let Some(remote) = self.remote.as_ref() {
            for (address, account) in remote.accounts.iter() {
                flat.put_account(*address, *account);
            }
            for ((address, slot), value) in remote.storage.iter() {
                flat.put_storage(*address, *slot, *value);
            }
            flat.codes
                .extend(remote.codes.iter().map(|(h, c)| (*h, c.clone())));
        }
        flat.apply_layer(&self.base);
        for checkpoint in self.checkpoints.iter() {
            flat.apply_checkpoint(checkpoint);
        }
        flat.finish()
    }

    /// Root over locally materialised state. Fork values only count once
    /// they have been written locally.
    pub fn get_state_root(&self) -> B256 {
        self.flatten_local().state_root()
    }

    /// Records the current committed state under its root so
    /// [`set_state_root`](Self::set_state_root) can return to it.
    pub fn commit_state_root(&mut self) -> Result<B256, StateError> {
        if !self.checkpoints.is_empty() {
            return Err(StateError::CheckpointOpen(self.checkpoints.len()));
        }
        let root = self.get_state_root();
        self.roots.insert(root, self.base.clone());
        debug!(state_root = %root, "state root recorded");
        Ok(root)
    }

    pub fn has_state_root(&self, root: &B256) -> bool {
        self.roots.contains_key(root)
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Forgets every recorded root outside `keep`. Returns how many went.
    pub fn retain_roots(&mut self, keep: &HashSet<B256>) -> usize {
        let before = self.roots.len();
        self.roots.retain(|root, _| keep.contains(root));
        let pruned = before - self.roots.len();
        if pruned > 0 {
            debug!(pruned, kept = self.roots.len(), "state roots pruned");
        }
        pruned
    }

    pub fn set_state_root(&mut self, root: B256) -> Result<(), StateError> {
        if !self.checkpoints.is_empty() {
            return Err(StateError::CheckpointOpen(self.checkpoints.len()));
        }
        let layer = self
            .roots
            .get(&root)
            .cloned()
            .ok_or(StateError::StateRootNotFound(root))?;
        self.base = layer;
        Ok(())
    }

    /// Read-only view of a recorded root.
    pub fn at_root(&self, root: &B256) -> Result<HistoricalState<'_>, StateError> {
        let layer = self
            .roots
            .get(root)
            .ok_or(StateError::StateRootNotFound(*root))?;
        Ok(HistoricalState {
            layer,
            remote: self.remote.as_ref(),
        })
    }

    pub fn cache_remote_account(
        &mut self,
        address: Address,
        fetched: Option<(u64, U256, Bytes)>,
    ) {
        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        let account = fetched.map(|(nonce, balance, code)| {
            let mut account = AccountState::new(nonce, balance);
            if !code.is_empty() {
                let hash = keccak256(&code);
                remote.codes.insert(hash, code);
                account.code_hash = hash;
            }
            account
        });
        remote.accounts.insert(address, account);
    }

    pub fn cache_remote_storage(&mut self, address: Address, slot: B256, value: U256) {
        if let Some(remote) = self.remote.as_mut() {
            remote.storage.insert((address, slot), value);
        }
    }

    pub fn dump(&self) -> StateDump {
        let flat = self.flatten();
        let mut accounts = BTreeMap::new();
        for (address, account) in flat.accounts.iter() {
            let code = if account.has_code() {
                flat.codes.get(&account.code_hash).cloned().unwrap_or_default()
            } else {
                Bytes::new()
            };
            accounts.insert(
                *address,
                DumpedAccount {
                    nonce: account.nonce,
                    balance: account.balance,
                    code,
                    storage: flat.storage.get(address).cloned().unwrap_or_default(),
                },
            );
        }
        StateDump { accounts }
    }

    /// Merges a dump into the current layer; accounts in the dump replace
    /// existing ones wholesale.
    pub fn load(&mut self, dump: StateDump) {
        for (address, dumped) in dump.accounts {
            self.clear_storage(address);
            let code_hash = self.insert_code(dumped.code);
            self.put_account(
                address,
                AccountState {
                    nonce: dumped.nonce,
                    balance: dumped.balance,
                    code_hash,
                },
            );
            for (slot, value) in dumped.storage {
                self.put_storage(address, slot, value);
            }
        }
    }
}

impl StateRead for StateManager {
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        self.get_account(address)
    }

    fn storage(&self, address: &Address, slot: &B256) -> Result<U256, StateError> {
        self.get_storage(address, slot)
    }

    fn code(&self, code_hash: &B256) -> Result<Bytes, StateError> {
        self.get_code(code_hash)
    }
}

/// State as of a recorded root. Fork misses fall through to the live remote
/// cache, whose values are fixed at the fork point.
#[derive(Clone, Copy, Debug)]
pub struct HistoricalState<'a> {
    layer: &'a Layer,
    remote: Option<&'a RemoteCache>,
}

impl StateRead for HistoricalState<'_> {
    fn account(&self, address: &Address) -> Result<Option<AccountState>, StateError> {
        read_account(self.layer, self.remote, address)
    }

    fn storage(&self, address: &Address, slot: &B256) -> Result<U256, StateError> {
        read_storage(self.layer, self.remote, address, slot)
    }

    fn code(&self, code_hash: &B256) -> Result<Bytes, StateError> {
        Ok(read_code(self.layer, self.remote, code_hash))
    }
}

fn read_account(
    layer: &Layer,
    remote: Option<&RemoteCache>,
    address: &Address,
) -> Result<Option<AccountState>, StateError> {
    match layer.account(address) {
        Lookup::Hit(account) => Ok(Some(account)),
        Lookup::Gone => Ok(None),
        Lookup::Miss => match remote {
            Some(remote) => remote.account(address),
            None => Ok(None),
        },
    }
}

fn read_storage(
    layer: &Layer,
    remote: Option<&RemoteCache>,
    address: &Address,
    slot: &B256,
) -> Result<U256, StateError> {
    match layer.storage(address, slot) {
        Lookup::Hit(value) => Ok(value),
        Lookup::Gone => Ok(U256::ZERO),
        Lookup::Miss => match remote {
            Some(remote) => remote.storage(address, slot),
            None => Ok(U256::ZERO),
        },
    }
}

fn read_code(layer: &Layer, remote: Option<&RemoteCache>, code_hash: &B256) -> Bytes {
    if *code_hash == KECCAK_EMPTY {
        return Bytes::new();
    }
    layer
        .codes
        .get(code_hash)
        .or_else(|| remote.and_then(|r| r.codes.get(code_hash)))
        .cloned()
        .unwrap_or_default()
}
