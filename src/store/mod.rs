//! Per-vnode storage.
//!
//! Every local vnode owns three tables: its primary values, the replica
//! copies it holds for other masters, and values staged for hand-off. All
//! three sit behind one lock so a key moves between them atomically.
//! Callers must not hold a guard across an `.await`.

pub mod demoted;
pub mod replica;

pub use demoted::DemotedStore;
pub use replica::ReplicaStore;

use crate::error::{Error, Result};
use crate::types::{ReplicaState, RingKey, Value, Vnode, VnodeStatus};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The tables of one vnode.
#[derive(Debug, Default)]
pub struct VnodeTables {
    /// Values this vnode is master of.
    pub primary: HashMap<Bytes, Value>,

    /// Copies held for other masters.
    pub replicas: ReplicaStore,

    /// Values on their way to a new master.
    pub demoted: DemotedStore,
}

impl VnodeTables {
    /// Entry counts.
    pub fn status(&self) -> VnodeStatus {
        VnodeStatus {
            primary: self.primary.len(),
            replicas_complete: self.replicas.count_in_state(ReplicaState::Complete),
            replicas_incomplete: self.replicas.count_in_state(ReplicaState::Incomplete),
            demoted: self.demoted.len(),
        }
    }
}

/// Shared handle to one vnode's tables.
pub type SharedTables = Arc<Mutex<VnodeTables>>;

/// Map from local vnode id to its tables.
#[derive(Debug, Default)]
pub struct TableManager {
    tables: DashMap<RingKey, SharedTables>,
}

impl TableManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty tables for `vnode` unless they already exist.
    pub fn register(&self, vnode: &Vnode) -> SharedTables {
        self.tables.entry(vnode.id).or_default().clone()
    }

    /// Drop the tables of `vnode`.
    pub fn unregister(&self, vnode: &Vnode) -> Option<SharedTables> {
        self.tables.remove(&vnode.id).map(|(_, tables)| tables)
    }

    /// Tables of `vnode`, if registered.
    pub fn get(&self, vnode: &Vnode) -> Option<SharedTables> {
        self.tables.get(&vnode.id).map(|t| t.clone())
    }

    /// Tables of `vnode`, or [`Error::UnknownVnode`].
    pub fn require(&self, vnode: &Vnode) -> Result<SharedTables> {
        self.get(vnode).ok_or(Error::UnknownVnode(vnode.id))
    }

    /// Check if `vnode` has tables.
    pub fn contains(&self, vnode: &Vnode) -> bool {
        self.tables.contains_key(&vnode.id)
    }

    /// Number of registered vnodes.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if no vnode is registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
