//! Multi-host table cluster running in one process.

use super::LoopbackClient;
use crate::cluster::{RingEvent, RingEventListener};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::ring::{Ring, StaticRing};
use crate::table::DTable;
use crate::types::Vnode;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A set of [`DTable`] nodes sharing one [`StaticRing`] and talking over a
/// [`LoopbackClient`].
///
/// Membership changes go through the cluster so that the neighbours of a
/// joining or leaving vnode get their ring events, the way a real ring
/// would deliver them.
pub struct TestCluster {
    /// Shared membership.
    ring: StaticRing,

    /// Transport shared by every node.
    client: Arc<LoopbackClient>,

    /// Nodes by host address.
    nodes: BTreeMap<String, Arc<DTable>>,
}

impl TestCluster {
    /// Create an empty cluster with replication factor `replicas`.
    pub fn new(replicas: usize) -> Self {
        Self {
            ring: StaticRing::new("", replicas),
            client: Arc::new(LoopbackClient::new()),
            nodes: BTreeMap::new(),
        }
    }

    /// Start a node for `host`.
    pub fn add_host(&mut self, host: &str) -> Result<Arc<DTable>> {
        let view = Arc::new(self.ring.for_host(host));
        let config = TableConfig::new(host).with_replicas(view.replicas());
        let table = Arc::new(DTable::new(
            config,
            view.clone(),
            view,
            self.client.clone(),
        )?);

        self.client.register(host, &table);
        self.nodes.insert(host.to_string(), table.clone());
        Ok(table)
    }

    /// The node for `host`.
    pub fn node(&self, host: &str) -> Result<Arc<DTable>> {
        self.nodes
            .get(host)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no node for host {}", host)))
    }

    /// The shared transport.
    pub fn client(&self) -> &Arc<LoopbackClient> {
        &self.client
    }

    /// The shared ring membership.
    pub fn ring(&self) -> &StaticRing {
        &self.ring
    }

    /// Master vnode of `key`.
    pub async fn owner(&self, key: &[u8]) -> Result<Vnode> {
        self.ring
            .lookup(1, key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Ring("empty ring".into()))
    }

    /// Join `vnode` to the ring and let its neighbours react.
    pub async fn add_vnode(&self, vnode: Vnode) -> Result<()> {
        self.node(&vnode.host)?.register_vnode(&vnode);
        self.ring.add_vnode(vnode.clone());

        let (successor, predecessor) = self.ring.neighbours(&vnode);
        debug!(vnode = %vnode, successor = ?successor, predecessor = ?predecessor, "Vnode joined");

        if let Some(succ) = successor {
            self.deliver(&succ, &vnode, RingEvent::PredecessorJoined).await;
        }
        if let Some(pred) = predecessor {
            self.deliver(&pred, &vnode, RingEvent::SuccessorJoined).await;
        }
        Ok(())
    }

    /// Remove `vnode` from the ring, dropping its tables as a crash would,
    /// and let its neighbours react.
    pub async fn remove_vnode(&self, vnode: &Vnode) -> Result<()> {
        let (successor, predecessor) = self.ring.neighbours(vnode);
        self.ring.remove_vnode(vnode);
        self.node(&vnode.host)?.unregister_vnode(vnode);
        debug!(vnode = %vnode, "Vnode left");

        if let Some(succ) = successor {
            self.deliver(&succ, vnode, RingEvent::PredecessorLeft).await;
        }
        if let Some(pred) = predecessor {
            self.deliver(&pred, vnode, RingEvent::SuccessorLeft).await;
        }
        Ok(())
    }

    async fn deliver(&self, local: &Vnode, other: &Vnode, event: RingEvent) {
        if let Some(table) = self.nodes.get(&local.host) {
            let listener: &dyn RingEventListener = table.as_ref();
            listener.on_event(local, other, event).await;
        }
    }
}
