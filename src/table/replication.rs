//! Chained replication of a single key.

use crate::network::client::TableClient;
use crate::network::wire::{SetMetaRequest, SetRequest};
use crate::ring::VnodeDirectory;
use crate::store::TableManager;
use crate::types::{ReplicaMeta, ReplicaState, Value, Vnode};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// How far one replication pass got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationOutcome {
    /// Remote successors the value was meant for, in chain order.
    pub targets: Vec<Vnode>,

    /// Replicas that accepted the value, a prefix of `targets`.
    pub written: Vec<Vnode>,

    /// Replicas that accepted the chain metadata, counted from the front.
    pub meta_sent: usize,

    /// State sent with the metadata.
    pub state: ReplicaState,
}

impl ReplicationOutcome {
    /// Whether every target holds the value and knows its place in the
    /// chain.
    pub fn is_complete(&self) -> bool {
        self.written.len() == self.targets.len() && self.meta_sent == self.written.len()
    }
}

/// Pushes values down the replica chain of a vnode.
#[derive(Clone)]
pub struct Replicator {
    directory: Arc<dyn VnodeDirectory>,
    client: Arc<dyn TableClient>,
    tables: Arc<TableManager>,
}

impl Replicator {
    /// Create a replicator.
    pub fn new(
        directory: Arc<dyn VnodeDirectory>,
        client: Arc<dyn TableClient>,
        tables: Arc<TableManager>,
    ) -> Self {
        Self {
            directory,
            client,
            tables,
        }
    }

    /// Copy `value` to up to `limit` remote successors of `vnode`.
    ///
    /// Sets go out one at a time and the first failure stops the pass. Every
    /// replica that took the value then gets the written chain, marked
    /// complete only if no set failed. Nothing is rolled back.
    ///
    /// After a failed set the replicas already written still get their
    /// metadata, with [`ReplicaState::Incomplete`] rather than `Complete`.
    pub async fn replicate_key(
        &self,
        vnode: &Vnode,
        key: &Bytes,
        value: &Value,
        limit: usize,
    ) -> ReplicationOutcome {
        let mut outcome = ReplicationOutcome::default();

        let Some(handler) = self.directory.vnode_handler(vnode) else {
            warn!(vnode = %vnode, "No handler for vnode, skipping replication");
            return outcome;
        };

        outcome.targets = match handler.find_remote_successors(limit).await {
            Ok(successors) => successors,
            Err(e) => {
                warn!(vnode = %vnode, key = ?key, error = %e, "Failed to find remote successors");
                return outcome;
            }
        };

        for (depth, target) in outcome.targets.iter().enumerate() {
            let req = SetRequest {
                origin: vnode.clone(),
                target: target.clone(),
                key: key.clone(),
                value: value.to_replica(),
                replica_count: 0,
                demoting: false,
                depth,
            };
            if let Err(e) = self.client.set(req).await {
                warn!(
                    vnode = %vnode,
                    target = %target,
                    key = ?key,
                    depth,
                    error = %e,
                    "Replica set failed, aborting chain"
                );
                break;
            }
            outcome.written.push(target.clone());
        }

        outcome.state = if outcome.written.len() == outcome.targets.len() {
            ReplicaState::Complete
        } else {
            ReplicaState::Incomplete
        };

        for (depth, replica) in outcome.written.iter().enumerate() {
            let req = SetMetaRequest {
                target: replica.clone(),
                key: key.clone(),
                meta: ReplicaMeta {
                    depth,
                    state: outcome.state,
                    master: vnode.clone(),
                    chain: outcome.written.clone(),
                },
            };
            if let Err(e) = self.client.set_meta(req).await {
                warn!(
                    vnode = %vnode,
                    target = %replica,
                    key = ?key,
                    error = %e,
                    "Replica metadata update failed"
                );
                break;
            }
            outcome.meta_sent += 1;
        }

        self.record_state(vnode, key, value, &outcome);
        debug!(
            vnode = %vnode,
            key = ?key,
            written = outcome.written.len(),
            targets = outcome.targets.len(),
            "Replication pass finished"
        );
        outcome
    }

    /// Note the chain state on the primary copy, unless it was overwritten
    /// in the meantime.
    fn record_state(
        &self,
        vnode: &Vnode,
        key: &Bytes,
        value: &Value,
        outcome: &ReplicationOutcome,
    ) {
        let Some(tables) = self.tables.get(vnode) else {
            return;
        };
        let mut tables = tables.lock();
        if let Some(stored) = tables.primary.get_mut(key) {
            if stored.timestamp == value.timestamp {
                stored.rstate = if outcome.is_complete() {
                    ReplicaState::Complete
                } else {
                    ReplicaState::Incomplete
                };
            }
        }
    }
}
