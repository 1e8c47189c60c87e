//! Reactions to ring membership changes.
//!
//! When a predecessor leaves, the vnode becomes master of the keys it held
//! first replicas for (promotion). When a predecessor joins, the keys that
//! now fall before it move to the newcomer (demotion). Values handed to a
//! remote newcomer wait in the demoted table until the newcomer confirms
//! with a clear-demoted call.

use super::DTable;
use crate::cluster::{RingEvent, RingEventListener};
use crate::network::wire::{SetMetaRequest, SetRequest};
use crate::ring::between;
use crate::store::SharedTables;
use crate::types::{DemotedItem, ReplicaMeta, ReplicaState, RingKey, Value, Vnode};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

impl DTable {
    /// Handle a ring event concerning `local`.
    ///
    /// Events for vnodes without a handler are ignored, as is everything
    /// other than a predecessor joining or leaving.
    pub async fn delegate(&self, local: &Vnode, other: &Vnode, event: RingEvent) {
        if self.directory.vnode_handler(local).is_none() {
            return;
        }

        match event {
            RingEvent::PredecessorLeft => {
                self.retry_demoted(local).await;
                self.promote(local).await;
            }
            RingEvent::PredecessorJoined => {
                self.retry_demoted(local).await;
                self.demote(local, other).await;
            }
            RingEvent::ReplicasChanged | RingEvent::SuccessorJoined | RingEvent::SuccessorLeft => {}
        }
    }

    /// Take over the keys `vnode` holds first replicas of, if it is now their
    /// master, and drop the copies it no longer needs.
    pub async fn promote(&self, vnode: &Vnode) {
        let Some(tables) = self.tables.get(vnode) else {
            debug!(vnode = %vnode, "No tables for vnode, nothing to promote");
            return;
        };

        let candidates = tables.lock().replicas.at_depth(0);
        for (key, replica) in candidates {
            let owner = match self.ring.lookup(1, &key).await {
                Ok(owners) => owners.into_iter().next(),
                Err(e) => {
                    warn!(vnode = %vnode, key = ?key, error = %e, "Lookup failed, skipping promotion");
                    continue;
                }
            };
            let Some(owner) = owner else {
                warn!(vnode = %vnode, key = ?key, "Lookup found no successor, skipping promotion");
                continue;
            };

            if owner != *vnode {
                tables.lock().replicas.remove(&key);
                debug!(vnode = %vnode, key = ?key, owner = %owner, "Dropped replica owned elsewhere");
                continue;
            }

            let value = replica.to_value().committed();
            tables.lock().primary.insert(key.clone(), value.clone());
            self.replicator
                .replicate_key(vnode, &key, &value, self.ring.replicas())
                .await;
            tables.lock().replicas.remove(&key);
            info!(vnode = %vnode, key = ?key, "Promoted replica to primary");
        }
    }

    /// Hand the keys that now belong to `new_pred` over to it.
    pub async fn demote(&self, vnode: &Vnode, new_pred: &Vnode) {
        let local = self
            .ring
            .my_vnodes()
            .iter()
            .any(|v| v.host == new_pred.host);

        if local {
            self.demote_local(vnode, new_pred).await;
        } else {
            self.demote_remote(vnode, new_pred).await;
        }
    }

    /// The new predecessor lives on this host: move the replica entries to
    /// it and tell the rest of each chain.
    async fn demote_local(&self, vnode: &Vnode, new_pred: &Vnode) {
        let Some(source) = self.tables.get(vnode) else {
            return;
        };
        let target = self.tables.register(new_pred);

        let keys = source.lock().replicas.keys();
        for key in keys {
            let Some(mut entry) = source.lock().replicas.remove(&key) else {
                continue;
            };

            let depth = entry.depth;
            match entry.chain.get_mut(depth) {
                Some(slot) => *slot = new_pred.clone(),
                None => {
                    debug!(vnode = %vnode, key = ?key, depth, "Replica has no chain slot to rewrite");
                }
            }
            let chain = entry.chain.clone();
            let master = entry.master.clone();
            target.lock().replicas.insert(key.clone(), entry);
            debug!(vnode = %vnode, new_pred = %new_pred, key = ?key, "Moved replica to local predecessor");

            let Some(master) = master else {
                warn!(vnode = %vnode, key = ?key, "Replica has no master, chain not updated");
                continue;
            };

            if self.push_chain(&key, &master, &chain, depth).await == ReplicaState::Incomplete {
                if let Some(moved) = target.lock().replicas.get_mut(&key) {
                    moved.state = ReplicaState::Incomplete;
                }
            }
        }
    }

    /// Send the rewritten chain to every member except the one at `skip`.
    ///
    /// The state starts out complete and drops to incomplete after the first
    /// failed push. Returns the final state.
    async fn push_chain(
        &self,
        key: &Bytes,
        master: &Vnode,
        chain: &[Vnode],
        skip: usize,
    ) -> ReplicaState {
        let mut state = ReplicaState::Complete;

        for (depth, member) in chain.iter().enumerate() {
            if depth == skip {
                continue;
            }
            let req = SetMetaRequest {
                target: member.clone(),
                key: key.clone(),
                meta: ReplicaMeta {
                    depth,
                    state,
                    master: master.clone(),
                    chain: chain.to_vec(),
                },
            };
            if let Err(e) = self.client.set_meta(req).await {
                warn!(target = %member, key = ?key, error = %e, "Chain metadata push failed");
                state = ReplicaState::Incomplete;
            }
        }

        state
    }

    /// The new predecessor lives elsewhere: stage and send it every key in
    /// `(vnode, new_pred]`.
    async fn demote_remote(&self, vnode: &Vnode, new_pred: &Vnode) {
        let Some(tables) = self.tables.get(vnode) else {
            return;
        };
        let chain = self.current_chain(vnode).await;

        let moving = {
            let mut tables = tables.lock();
            let keys: Vec<Bytes> = tables
                .primary
                .keys()
                .filter(|k| between(&vnode.id, &new_pred.id, &RingKey::for_key(k), true))
                .cloned()
                .collect();

            let mut moving = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = tables.primary.remove(&key) {
                    let mut item = DemotedItem::from_value(key.clone(), &value, new_pred.clone());
                    item.chain = chain.clone();
                    tables.demoted.stage(item);
                    moving.push((key, value));
                }
            }
            moving
        };

        if moving.is_empty() {
            return;
        }
        info!(vnode = %vnode, new_pred = %new_pred, keys = moving.len(), "Demoting keys to new predecessor");

        for (key, value) in moving {
            let req = SetRequest {
                origin: vnode.clone(),
                target: new_pred.clone(),
                key: key.clone(),
                value,
                replica_count: self.ring.replicas(),
                demoting: true,
                depth: 0,
            };
            if let Err(e) = self.client.set(req).await {
                warn!(vnode = %vnode, new_pred = %new_pred, key = ?key, error = %e, "Demotion send failed, key stays staged");
            }
        }
    }

    /// Give every staged item of `vnode` another delivery attempt, or take
    /// it back if `vnode` owns its key again.
    pub async fn retry_demoted(&self, vnode: &Vnode) {
        let Some(tables) = self.tables.get(vnode) else {
            return;
        };

        let items = tables.lock().demoted.items();
        for item in items {
            let owner = match self.ring.lookup(1, &item.key).await {
                Ok(owners) => owners.into_iter().next(),
                Err(e) => {
                    warn!(vnode = %vnode, key = ?item.key, error = %e, "Lookup failed, demoted item stays staged");
                    continue;
                }
            };
            let Some(owner) = owner else {
                continue;
            };

            if owner == *vnode {
                if let Some(value) = restore(&tables, &item) {
                    info!(vnode = %vnode, key = ?item.key, "Restored demoted item");
                    self.replicator
                        .replicate_key(vnode, &item.key, &value, self.ring.replicas())
                        .await;
                }
                continue;
            }

            tables.lock().demoted.retarget(&item.key, owner.clone());
            let req = SetRequest {
                origin: vnode.clone(),
                target: owner.clone(),
                key: item.key.clone(),
                value: item.to_value(),
                replica_count: self.ring.replicas(),
                demoting: true,
                depth: 0,
            };
            match self.client.set(req).await {
                Ok(()) => debug!(vnode = %vnode, owner = %owner, key = ?item.key, "Re-sent demoted item"),
                Err(e) => {
                    warn!(vnode = %vnode, owner = %owner, key = ?item.key, error = %e, "Demoted item re-send failed")
                }
            }
        }
    }

    async fn current_chain(&self, vnode: &Vnode) -> Vec<Vnode> {
        let Some(handler) = self.directory.vnode_handler(vnode) else {
            return Vec::new();
        };
        handler
            .find_remote_successors(self.ring.replicas())
            .await
            .unwrap_or_default()
    }
}

/// Move a staged item back into the primary table unless a newer write
/// already landed there. Returns the restored value.
fn restore(tables: &SharedTables, item: &DemotedItem) -> Option<Value> {
    let mut tables = tables.lock();
    tables.demoted.remove(&item.key)?;

    let value = item.to_value().committed();
    match tables.primary.get(&item.key) {
        Some(existing) if existing.timestamp > value.timestamp => None,
        _ => {
            tables.primary.insert(item.key.clone(), value.clone());
            Some(value)
        }
    }
}

#[async_trait]
impl RingEventListener for DTable {
    async fn on_event(&self, local: &Vnode, other: &Vnode, event: RingEvent) {
        self.delegate(local, other, event).await;
    }
}
