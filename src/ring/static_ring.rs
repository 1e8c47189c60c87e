//! In-process ring with explicitly managed membership.
//!
//! Vnodes sit in a `BTreeMap` keyed by ring position. The successor of a
//! position is the first vnode at or after it, wrapping to the smallest
//! position past the end of the ring.

use super::{Ring, VnodeDirectory, VnodeHandler};
use crate::cluster::RingEvent;
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::types::{RingKey, Vnode};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// A ring event addressed to a vnode served by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingChange {
    /// The local vnode the event concerns.
    pub local: Vnode,
    /// The vnode that joined or left.
    pub other: Vnode,
    /// What happened.
    pub event: RingEvent,
}

/// A ring whose membership is changed by direct calls.
///
/// Clones share membership.
#[derive(Debug, Clone)]
pub struct StaticRing {
    /// Host whose vnodes count as local.
    local_host: String,

    /// Replication factor reported to the table.
    replicas: usize,

    /// Vnodes by ring position.
    vnodes: Arc<RwLock<BTreeMap<RingKey, Vnode>>>,
}

impl StaticRing {
    /// Create an empty ring for `local_host`.
    pub fn new(local_host: impl Into<String>, replicas: usize) -> Self {
        Self {
            local_host: local_host.into(),
            replicas: replicas.max(1),
            vnodes: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create an empty ring from table configuration.
    pub fn from_config(config: &TableConfig) -> Self {
        Self::new(config.host.clone(), config.replicas)
    }

    /// A view of the same membership from another host.
    pub fn for_host(&self, host: impl Into<String>) -> Self {
        Self {
            local_host: host.into(),
            replicas: self.replicas,
            vnodes: self.vnodes.clone(),
        }
    }

    /// Check if `vnode` is served by this process.
    pub fn is_local(&self, vnode: &Vnode) -> bool {
        vnode.host == self.local_host
    }

    /// Number of vnodes in the ring.
    pub fn len(&self) -> usize {
        self.vnodes.read().len()
    }

    /// Check if the ring has no vnodes.
    pub fn is_empty(&self) -> bool {
        self.vnodes.read().is_empty()
    }

    /// All vnodes in ring order.
    pub fn vnodes(&self) -> Vec<Vnode> {
        self.vnodes.read().values().cloned().collect()
    }

    /// Add `count` vnodes for `host`, placed by hashing `host:index`.
    pub fn add_host(&self, host: &str, count: usize) -> Vec<RingChange> {
        (0..count)
            .flat_map(|i| self.add_vnode(Vnode::for_host(host, i)))
            .collect()
    }

    /// Add a vnode, returning the events its local neighbours observe.
    pub fn add_vnode(&self, vnode: Vnode) -> Vec<RingChange> {
        let mut vnodes = self.vnodes.write();
        if vnodes.contains_key(&vnode.id) {
            return Vec::new();
        }
        vnodes.insert(vnode.id, vnode.clone());

        let successor = next_after(&vnodes, &vnode.id);
        let predecessor = prev_before(&vnodes, &vnode.id);
        drop(vnodes);

        tracing::debug!(vnode = %vnode, "Vnode added to ring");
        self.neighbour_changes(
            &vnode,
            successor,
            predecessor,
            RingEvent::PredecessorJoined,
            RingEvent::SuccessorJoined,
        )
    }

    /// Remove a vnode, returning the events its local neighbours observe.
    pub fn remove_vnode(&self, vnode: &Vnode) -> Vec<RingChange> {
        let mut vnodes = self.vnodes.write();
        if !vnodes.contains_key(&vnode.id) {
            return Vec::new();
        }

        let successor = next_after(&vnodes, &vnode.id);
        let predecessor = prev_before(&vnodes, &vnode.id);
        vnodes.remove(&vnode.id);
        drop(vnodes);

        tracing::debug!(vnode = %vnode, "Vnode removed from ring");
        self.neighbour_changes(
            vnode,
            successor,
            predecessor,
            RingEvent::PredecessorLeft,
            RingEvent::SuccessorLeft,
        )
    }

    /// Successor and predecessor of a vnode in the ring, excluding itself.
    pub fn neighbours(&self, vnode: &Vnode) -> (Option<Vnode>, Option<Vnode>) {
        let vnodes = self.vnodes.read();
        (next_after(&vnodes, &vnode.id), prev_before(&vnodes, &vnode.id))
    }

    /// Up to `n` vnodes starting at the successor of `position`.
    pub fn lookup_position(&self, n: usize, position: &RingKey) -> Result<Vec<Vnode>> {
        let vnodes = self.vnodes.read();
        if vnodes.is_empty() {
            return Err(Error::Ring("ring is empty".into()));
        }

        Ok(vnodes
            .range(position..)
            .chain(vnodes.range(..position))
            .map(|(_, v)| v.clone())
            .take(n.min(vnodes.len()))
            .collect())
    }

    fn neighbour_changes(
        &self,
        vnode: &Vnode,
        successor: Option<Vnode>,
        predecessor: Option<Vnode>,
        successor_sees: RingEvent,
        predecessor_sees: RingEvent,
    ) -> Vec<RingChange> {
        let mut changes = Vec::new();
        if let Some(succ) = successor.filter(|s| self.is_local(s)) {
            changes.push(RingChange {
                local: succ,
                other: vnode.clone(),
                event: successor_sees,
            });
        }
        if let Some(pred) = predecessor.filter(|p| self.is_local(p)) {
            changes.push(RingChange {
                local: pred,
                other: vnode.clone(),
                event: predecessor_sees,
            });
        }
        changes
    }
}

/// The first vnode strictly after `id`, wrapping, excluding `id` itself.
fn next_after(vnodes: &BTreeMap<RingKey, Vnode>, id: &RingKey) -> Option<Vnode> {
    vnodes
        .range((Bound::Excluded(id), Bound::Unbounded))
        .chain(vnodes.range(..id))
        .map(|(_, v)| v.clone())
        .next()
}

/// The last vnode strictly before `id`, wrapping, excluding `id` itself.
fn prev_before(vnodes: &BTreeMap<RingKey, Vnode>, id: &RingKey) -> Option<Vnode> {
    vnodes
        .range(..id)
        .rev()
        .chain(vnodes.range((Bound::Excluded(id), Bound::Unbounded)).rev())
        .map(|(_, v)| v.clone())
        .next()
}

#[async_trait]
impl Ring for StaticRing {
    async fn lookup(&self, n: usize, key: &[u8]) -> Result<Vec<Vnode>> {
        self.lookup_position(n, &RingKey::for_key(key))
    }

    fn my_vnodes(&self) -> Vec<Vnode> {
        self.vnodes
            .read()
            .values()
            .filter(|v| self.is_local(v))
            .cloned()
            .collect()
    }

    fn replicas(&self) -> usize {
        self.replicas
    }
}

impl VnodeDirectory for StaticRing {
    fn vnode_handler(&self, vnode: &Vnode) -> Option<Arc<dyn VnodeHandler>> {
        if !self.is_local(vnode) || self.vnodes.read().get(&vnode.id) != Some(vnode) {
            return None;
        }
        Some(Arc::new(StaticVnodeHandler {
            vnode: vnode.clone(),
            vnodes: self.vnodes.clone(),
        }))
    }
}

struct StaticVnodeHandler {
    vnode: Vnode,
    vnodes: Arc<RwLock<BTreeMap<RingKey, Vnode>>>,
}

#[async_trait]
impl VnodeHandler for StaticVnodeHandler {
    async fn find_remote_successors(&self, limit: usize) -> Result<Vec<Vnode>> {
        let vnodes = self.vnodes.read();
        if !vnodes.contains_key(&self.vnode.id) {
            return Err(Error::UnknownVnode(self.vnode.id));
        }

        let mut successors: Vec<Vnode> = Vec::with_capacity(limit);
        let walk = vnodes
            .range((Bound::Excluded(&self.vnode.id), Bound::Unbounded))
            .chain(vnodes.range(..&self.vnode.id));

        for (_, candidate) in walk {
            if successors.len() >= limit {
                break;
            }
            if candidate.host == self.vnode.host
                || successors.iter().any(|s| s.host == candidate.host)
            {
                continue;
            }
            successors.push(candidate.clone());
        }

        Ok(successors)
    }
}
