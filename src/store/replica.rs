//! Replica copies held by a vnode, with their chain metadata.

use crate::types::{ReplicaMeta, ReplicaState, ReplicaValue};
use bytes::Bytes;
use std::collections::HashMap;

/// Replica entries of one vnode, keyed by user key.
#[derive(Debug, Default)]
pub struct ReplicaStore {
    entries: HashMap<Bytes, ReplicaValue>,
}

impl ReplicaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a replica entry.
    pub fn get(&self, key: &[u8]) -> Option<&ReplicaValue> {
        self.entries.get(key)
    }

    /// Get a replica entry for update.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut ReplicaValue> {
        self.entries.get_mut(key)
    }

    /// Insert or replace a replica entry.
    pub fn insert(&mut self, key: Bytes, value: ReplicaValue) -> Option<ReplicaValue> {
        self.entries.insert(key, value)
    }

    /// Remove a replica entry.
    pub fn remove(&mut self, key: &[u8]) -> Option<ReplicaValue> {
        self.entries.remove(key)
    }

    /// Apply chain metadata to an existing entry.
    ///
    /// Returns `false` when no entry exists for `key`.
    pub fn apply_meta(&mut self, key: &[u8], meta: ReplicaMeta) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.apply_meta(meta);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the entries at `depth`.
    pub fn at_depth(&self, depth: usize) -> Vec<(Bytes, ReplicaValue)> {
        self.entries
            .iter()
            .filter(|(_, v)| v.depth == depth)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Every key held.
    pub fn keys(&self) -> Vec<Bytes> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in `state`.
    pub fn count_in_state(&self, state: ReplicaState) -> usize {
        self.entries.values().filter(|v| v.state == state).count()
    }
}
