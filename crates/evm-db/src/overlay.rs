//! Write overlay for one checkpoint level: ordered writes where `None` is a deletion.

use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayMap<K, V> {
    writes: BTreeMap<K, Option<V>>,
}

impl<K: Ord, V> OverlayMap<K, V> {
    pub fn new() -> Self {
        Self {
            writes: BTreeMap::new(),
        }
    }

    /// `Some(None)` means the key was deleted at this level.
    pub fn get(&self, key: &K) -> Option<&Option<V>> {
        self.writes.get(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.writes.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: K) {
        self.writes.insert(key, None);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Option<V>)> {
        self.writes.iter()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.writes.retain(|key, _| keep(key));
    }

    /// Moves every write into `parent`, later writes winning.
    pub fn merge_into(self, parent: &mut OverlayMap<K, V>) {
        for (key, value) in self.writes {
            parent.writes.insert(key, value);
        }
    }

    pub fn drain_to<M>(&mut self, mut apply: M)
    where
        M: FnMut(K, Option<V>),
    {
        let writes = std::mem::take(&mut self.writes);
        for (key, value) in writes {
            apply(key, value);
        }
    }
}

impl<K: Ord, V> Default for OverlayMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
