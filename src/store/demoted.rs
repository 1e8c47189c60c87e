//! Staging area for values being handed to a new master.

use crate::types::{DemotedItem, Vnode};
use bytes::Bytes;
use std::collections::HashMap;

/// Demoted items of one vnode, keyed by user key.
#[derive(Debug, Default)]
pub struct DemotedStore {
    items: HashMap<Bytes, DemotedItem>,
}

impl DemotedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an item, replacing any earlier staging of the same key.
    pub fn stage(&mut self, item: DemotedItem) {
        self.items.insert(item.key.clone(), item);
    }

    /// Get a staged item.
    pub fn get(&self, key: &[u8]) -> Option<&DemotedItem> {
        self.items.get(key)
    }

    /// Remove a staged item.
    pub fn remove(&mut self, key: &[u8]) -> Option<DemotedItem> {
        self.items.remove(key)
    }

    /// Remove the item for `key` if it is still headed to `new_master`.
    pub fn clear_if_target(&mut self, key: &[u8], new_master: &Vnode) -> bool {
        match self.items.get(key) {
            Some(item) if item.new_master == *new_master => {
                self.items.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Point a staged item at a different new master.
    pub fn retarget(&mut self, key: &[u8], new_master: Vnode) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                item.new_master = new_master;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every staged item.
    pub fn items(&self) -> Vec<DemotedItem> {
        self.items.values().cloned().collect()
    }

    /// Number of staged items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
