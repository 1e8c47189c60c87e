//! Scriptable ring, directory and client doubles.

use crate::error::{Error, NetworkError, Result};
use crate::network::client::TableClient;
use crate::network::handler::RequestHandler;
use crate::network::wire::{ClearDemotedRequest, SetMetaRequest, SetRequest};
use crate::ring::{Ring, VnodeDirectory, VnodeHandler};
use crate::types::{RingKey, Vnode};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shorthand for a vnode at ring position `id`.
pub fn vnode(id: u64, host: &str) -> Vnode {
    Vnode::new(RingKey::from_u64(id), host)
}

/// A ring whose lookups and successor lists are set by the test.
///
/// Implements both [`Ring`] and [`VnodeDirectory`]. Only vnodes added with
/// [`MockRing::with_local`] or [`MockRing::add_local`] get handlers.
#[derive(Debug, Default)]
pub struct MockRing {
    /// Replication factor.
    replicas: usize,

    /// Vnodes served locally.
    local: RwLock<Vec<Vnode>>,

    /// Successor per user key.
    owners: RwLock<HashMap<Bytes, Vnode>>,

    /// Successor for keys without an explicit owner.
    default_owner: RwLock<Option<Vnode>>,

    /// Keys whose lookup fails.
    failing_keys: RwLock<HashSet<Bytes>>,

    /// Remote successors per local vnode.
    successors: RwLock<HashMap<RingKey, Vec<Vnode>>>,

    /// Local vnodes whose successor query fails.
    failing_successors: RwLock<HashSet<RingKey>>,

    /// Number of lookups served.
    lookups: AtomicUsize,
}

impl MockRing {
    /// Create a ring with replication factor `replicas`.
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            ..Default::default()
        }
    }

    /// Add a local vnode.
    pub fn with_local(self, vnode: Vnode) -> Self {
        self.add_local(vnode);
        self
    }

    /// Add a local vnode.
    pub fn add_local(&self, vnode: Vnode) {
        self.local.write().push(vnode);
    }

    /// Make `vnode` the successor of `key`.
    pub fn set_owner(&self, key: &[u8], vnode: Vnode) {
        self.owners.write().insert(Bytes::copy_from_slice(key), vnode);
    }

    /// Make `vnode` the successor of every key without an explicit owner.
    pub fn set_default_owner(&self, vnode: Vnode) {
        *self.default_owner.write() = Some(vnode);
    }

    /// Make lookups of `key` fail.
    pub fn fail_lookup(&self, key: &[u8]) {
        self.failing_keys.write().insert(Bytes::copy_from_slice(key));
    }

    /// Let lookups of `key` succeed again.
    pub fn heal_lookup(&self, key: &[u8]) {
        self.failing_keys.write().remove(key);
    }

    /// Set the remote successors reported for `vnode`.
    pub fn set_successors(&self, vnode: &Vnode, successors: Vec<Vnode>) {
        self.successors.write().insert(vnode.id, successors);
    }

    /// Make successor queries for `vnode` fail.
    pub fn fail_successors(&self, vnode: &Vnode) {
        self.failing_successors.write().insert(vnode.id);
    }

    /// Number of lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Ring for MockRing {
    async fn lookup(&self, n: usize, key: &[u8]) -> Result<Vec<Vnode>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if self.failing_keys.read().contains(key) {
            return Err(Error::Ring("injected lookup failure".into()));
        }

        let owner = self
            .owners
            .read()
            .get(key)
            .cloned()
            .or_else(|| self.default_owner.read().clone());

        match owner {
            Some(owner) if n > 0 => Ok(vec![owner]),
            Some(_) => Ok(Vec::new()),
            None => Err(Error::Ring("no owner configured".into())),
        }
    }

    fn my_vnodes(&self) -> Vec<Vnode> {
        self.local.read().clone()
    }

    fn replicas(&self) -> usize {
        self.replicas
    }
}

impl VnodeDirectory for MockRing {
    fn vnode_handler(&self, vnode: &Vnode) -> Option<Arc<dyn VnodeHandler>> {
        if !self.local.read().contains(vnode) {
            return None;
        }

        let successors = if self.failing_successors.read().contains(&vnode.id) {
            None
        } else {
            Some(
                self.successors
                    .read()
                    .get(&vnode.id)
                    .cloned()
                    .unwrap_or_default(),
            )
        };
        Some(Arc::new(MockVnodeHandler { successors }))
    }
}

struct MockVnodeHandler {
    successors: Option<Vec<Vnode>>,
}

#[async_trait]
impl VnodeHandler for MockVnodeHandler {
    async fn find_remote_successors(&self, limit: usize) -> Result<Vec<Vnode>> {
        match &self.successors {
            Some(successors) => Ok(successors.iter().take(limit).cloned().collect()),
            None => Err(Error::Ring("injected successor failure".into())),
        }
    }
}

/// An outbound call captured by [`RecordingClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Ping(Vnode),
    ListVnodes(String),
    Set(SetRequest),
    SetMeta(SetMetaRequest),
    ClearDemoted(ClearDemotedRequest),
}

/// A [`TableClient`] that records every call and fails on demand.
///
/// Failed calls are recorded too, since they were attempted.
#[derive(Debug, Default)]
pub struct RecordingClient {
    /// Calls in the order they were made.
    calls: Mutex<Vec<RecordedCall>>,

    /// Set calls seen so far.
    sets_seen: AtomicUsize,

    /// Set-metadata calls seen so far.
    metas_seen: AtomicUsize,

    /// 1-based index of the set call that fails.
    fail_set_at: Mutex<Option<usize>>,

    /// 1-based index of the set-metadata call that fails.
    fail_meta_at: Mutex<Option<usize>>,

    /// Vnodes every call to which fails.
    failing_targets: RwLock<HashSet<Vnode>>,
}

impl RecordingClient {
    /// Create a client that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `k`-th set call.
    pub fn fail_nth_set(&self, k: usize) {
        *self.fail_set_at.lock() = Some(k);
    }

    /// Fail the `k`-th set-metadata call.
    pub fn fail_nth_meta(&self, k: usize) {
        *self.fail_meta_at.lock() = Some(k);
    }

    /// Fail every call addressed to `vnode`.
    pub fn fail_target(&self, vnode: &Vnode) {
        self.failing_targets.write().insert(vnode.clone());
    }

    /// Stop failing calls to `vnode`.
    pub fn heal_target(&self, vnode: &Vnode) {
        self.failing_targets.write().remove(vnode);
    }

    /// Every recorded call.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Recorded set calls.
    pub fn sets(&self) -> Vec<SetRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Set(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded set-metadata calls.
    pub fn set_metas(&self) -> Vec<SetMetaRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::SetMeta(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded clear-demoted calls.
    pub fn clear_demoteds(&self) -> Vec<ClearDemotedRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::ClearDemoted(req) => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` clear-demoted calls were made, or
    /// `timeout` passes, and return those recorded.
    pub async fn wait_for_clear_demoted(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<ClearDemotedRequest> {
        let start = Instant::now();
        loop {
            let clears = self.clear_demoteds();
            if clears.len() >= count || start.elapsed() >= timeout {
                return clears;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, call: RecordedCall, target: &Vnode) -> Result<()> {
        self.calls.lock().push(call);
        if self.failing_targets.read().contains(target) {
            return Err(injected(target));
        }
        Ok(())
    }
}

fn injected(target: &Vnode) -> Error {
    Error::Network(NetworkError::ConnectionFailed {
        addr: target.host.clone(),
        reason: "injected failure".into(),
    })
}

#[async_trait]
impl TableClient for RecordingClient {
    async fn ping(&self, vnode: &Vnode) -> Result<bool> {
        self.record(RecordedCall::Ping(vnode.clone()), vnode)?;
        Ok(true)
    }

    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        self.calls.lock().push(RecordedCall::ListVnodes(host.to_string()));
        Ok(Vec::new())
    }

    async fn set(&self, req: SetRequest) -> Result<()> {
        let target = req.target.clone();
        self.record(RecordedCall::Set(req), &target)?;

        let n = self.sets_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if *self.fail_set_at.lock() == Some(n) {
            return Err(injected(&target));
        }
        Ok(())
    }

    async fn set_meta(&self, req: SetMetaRequest) -> Result<()> {
        let target = req.target.clone();
        self.record(RecordedCall::SetMeta(req), &target)?;

        let n = self.metas_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if *self.fail_meta_at.lock() == Some(n) {
            return Err(injected(&target));
        }
        Ok(())
    }

    async fn clear_demoted(&self, req: ClearDemotedRequest) -> Result<()> {
        let target = req.target.clone();
        self.record(RecordedCall::ClearDemoted(req), &target)
    }
}

/// A [`RequestHandler`] serving a fixed vnode list and accepting writes.
#[derive(Debug, Default)]
pub struct StaticHandler {
    /// Vnodes reported by `list_vnodes`.
    pub vnodes: Vec<Vnode>,

    /// Set requests received.
    received: Mutex<Vec<SetRequest>>,
}

impl StaticHandler {
    /// Create a handler reporting `vnodes`.
    pub fn new(vnodes: Vec<Vnode>) -> Self {
        Self {
            vnodes,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Set requests received so far.
    pub fn received(&self) -> Vec<SetRequest> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl RequestHandler for StaticHandler {
    async fn list_vnodes(&self) -> Result<Vec<Vnode>> {
        Ok(self.vnodes.clone())
    }

    async fn set(&self, req: SetRequest) -> Result<()> {
        self.received.lock().push(req);
        Ok(())
    }

    async fn set_meta(&self, req: SetMetaRequest) -> Result<()> {
        Err(Error::NoReplica {
            vnode: req.target.id,
        })
    }

    async fn clear_demoted(&self, _req: ClearDemotedRequest) -> Result<()> {
        Ok(())
    }
}
