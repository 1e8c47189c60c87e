//! The replicated table.
//!
//! A [`DTable`] owns the tables of the vnodes this process serves. Writes go
//! to the master vnode of a key and are pushed down its replica chain by the
//! [`Replicator`]. Ring events move keys between masters (see
//! [`DTable::delegate`]), and the [`RequestHandler`](crate::network::RequestHandler)
//! implementation serves the peers' side of all of it.
//!
//! ```text
//!   ring event ──► delegate ──► promote / demote ──► Replicator ──► TableClient
//!                                                                       │
//!   peer ◄──────────────────────────────────────────────────────────────┘
//!     │
//!     └──► NetworkServer ──► dispatch ──► DTable (RequestHandler) ──► TableManager
//! ```

mod delegate;
mod handler;
pub mod replication;

pub use replication::{ReplicationOutcome, Replicator};

use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::network::client::TableClient;
use crate::network::wire::SetRequest;
use crate::ring::{Ring, VnodeDirectory};
use crate::store::TableManager;
use crate::types::{Value, Vnode, VnodeStatus};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// A node of the replicated table.
pub struct DTable {
    /// Node configuration.
    config: TableConfig,

    /// Ring membership.
    ring: Arc<dyn Ring>,

    /// Handlers of the local vnodes.
    directory: Arc<dyn VnodeDirectory>,

    /// Outbound calls to peers.
    client: Arc<dyn TableClient>,

    /// Tables of the local vnodes.
    tables: Arc<TableManager>,

    /// Replica chain writer.
    replicator: Replicator,
}

impl DTable {
    /// Create a table node.
    pub fn new(
        config: TableConfig,
        ring: Arc<dyn Ring>,
        directory: Arc<dyn VnodeDirectory>,
        client: Arc<dyn TableClient>,
    ) -> Result<Self> {
        config.validate()?;

        let tables = Arc::new(TableManager::new());
        let replicator = Replicator::new(directory.clone(), client.clone(), tables.clone());

        info!(host = %config.host, replicas = ring.replicas(), "Table node created");

        Ok(Self {
            config,
            ring,
            directory,
            client,
            tables,
            replicator,
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Tables of the local vnodes.
    pub fn tables(&self) -> &TableManager {
        &self.tables
    }

    /// The replica chain writer.
    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    /// Create empty tables for a vnode this node serves.
    pub fn register_vnode(&self, vnode: &Vnode) {
        self.tables.register(vnode);
        debug!(vnode = %vnode, "Registered vnode");
    }

    /// Drop the tables of a vnode.
    pub fn unregister_vnode(&self, vnode: &Vnode) -> bool {
        let removed = self.tables.unregister(vnode).is_some();
        if removed {
            debug!(vnode = %vnode, "Unregistered vnode");
        }
        removed
    }

    /// Write `value` under `key`.
    ///
    /// A locally mastered key is committed and replicated before this
    /// returns. Otherwise the write is forwarded to the master.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        let key = key.into();
        let value = Value::new(value).committed();
        let owner = self.owner(&key).await?;

        if let Some(tables) = self.tables.get(&owner) {
            tables.lock().primary.insert(key.clone(), value.clone());
            self.replicator
                .replicate_key(&owner, &key, &value, self.ring.replicas())
                .await;
            return Ok(());
        }
        if owner.host == self.config.host {
            return Err(Error::UnknownVnode(owner.id));
        }

        let origin = self
            .ring
            .my_vnodes()
            .into_iter()
            .next()
            .ok_or_else(|| Error::Ring("no local vnodes".into()))?;

        debug!(owner = %owner, key = ?key, "Forwarding write to master");
        self.client
            .set(SetRequest {
                origin,
                target: owner,
                key,
                value,
                replica_count: self.ring.replicas(),
                demoting: false,
                depth: 0,
            })
            .await
    }

    /// Read the value under `key` from its local master.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let owner = self.owner(key).await?;

        match self.tables.get(&owner) {
            Some(tables) => Ok(tables.lock().primary.get(key).map(|v| v.data.clone())),
            None if owner.host == self.config.host => Err(Error::UnknownVnode(owner.id)),
            None => Err(Error::NotLocal {
                owner: owner.to_string(),
            }),
        }
    }

    /// Entry counts of a local vnode.
    pub fn status(&self, vnode: &Vnode) -> Result<VnodeStatus> {
        Ok(self.tables.require(vnode)?.lock().status())
    }

    async fn owner(&self, key: &[u8]) -> Result<Vnode> {
        self.ring
            .lookup(1, key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Ring("lookup returned no successor".into()))
    }
}
