//! The peer-facing side of the table.

use super::DTable;
use crate::error::{Error, Result};
use crate::network::handler::RequestHandler;
use crate::network::wire::{ClearDemotedRequest, SetMetaRequest, SetRequest};
use crate::types::{ReplicaState, ReplicaValue, Value, Vnode};
use async_trait::async_trait;
use tracing::{debug, info, warn};

#[async_trait]
impl RequestHandler for DTable {
    async fn list_vnodes(&self) -> Result<Vec<Vnode>> {
        Ok(self.ring.my_vnodes())
    }

    async fn set(&self, req: SetRequest) -> Result<()> {
        let SetRequest {
            origin,
            target,
            key,
            value,
            replica_count,
            demoting,
            depth,
        } = req;
        let tables = self.tables.require(&target)?;

        if value.is_replica && !demoting {
            let replica = ReplicaValue {
                data: value.data,
                timestamp: value.timestamp,
                depth,
                state: ReplicaState::Incomplete,
                master: Some(origin),
                chain: Vec::new(),
            };
            tables.lock().replicas.insert(key.clone(), replica);
            debug!(vnode = %target, key = ?key, depth, "Stored replica");
            return Ok(());
        }

        let value = Value {
            is_replica: false,
            committed: true,
            rstate: ReplicaState::Incomplete,
            ..value
        };

        let stored = {
            let mut tables = tables.lock();
            match tables.primary.get(&key) {
                Some(existing) if existing.timestamp > value.timestamp => false,
                _ => {
                    tables.primary.insert(key.clone(), value.clone());
                    true
                }
            }
        };
        if !stored {
            debug!(vnode = %target, key = ?key, "Kept newer primary value");
        } else if demoting {
            info!(vnode = %target, origin = %origin, key = ?key, "Took ownership of demoted key");
        }

        let replicator = self.replicator.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            if stored {
                replicator
                    .replicate_key(&target, &key, &value, replica_count)
                    .await;
            }
            if demoting {
                let clear = ClearDemotedRequest {
                    target: origin.clone(),
                    key: key.clone(),
                    new_master: target,
                };
                if let Err(e) = client.clear_demoted(clear).await {
                    warn!(origin = %origin, key = ?key, error = %e, "Clear-demoted call failed");
                }
            }
        });

        Ok(())
    }

    async fn set_meta(&self, req: SetMetaRequest) -> Result<()> {
        let tables = self.tables.require(&req.target)?;
        let applied = tables.lock().replicas.apply_meta(&req.key, req.meta);

        if applied {
            Ok(())
        } else {
            Err(Error::NoReplica {
                vnode: req.target.id,
            })
        }
    }

    async fn clear_demoted(&self, req: ClearDemotedRequest) -> Result<()> {
        let tables = self.tables.require(&req.target)?;
        let cleared = tables
            .lock()
            .demoted
            .clear_if_target(&req.key, &req.new_master);

        if cleared {
            debug!(vnode = %req.target, key = ?req.key, new_master = %req.new_master, "Cleared demoted item");
        } else {
            debug!(vnode = %req.target, key = ?req.key, "No matching demoted item to clear");
        }
        Ok(())
    }
}
