//! Core types used throughout the replicated table.

use bytes::Bytes;
use std::fmt;
use std::hash::Hasher;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use twox_hash::XxHash64;

/// Length in bytes of a ring position.
pub const RING_KEY_LEN: usize = 8;

/// A position on the consistent-hash ring.
///
/// Stored big-endian so that byte order and numeric order agree, which is
/// what [`crate::ring::between`] relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RingKey([u8; RING_KEY_LEN]);

impl RingKey {
    /// Create a ring key from a numeric ring position.
    pub const fn from_u64(position: u64) -> Self {
        Self(position.to_be_bytes())
    }

    /// Ring position of a user key (xxHash64, seed 0).
    pub fn for_key(key: &[u8]) -> Self {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        Self::from_u64(hasher.finish())
    }

    /// Parse a ring key from a wire slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; RING_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw big-endian bytes.
    pub fn as_bytes(&self) -> &[u8; RING_KEY_LEN] {
        &self.0
    }

    /// Numeric ring position.
    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }
}

impl fmt::Display for RingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.as_u64())
    }
}

/// A virtual node: a ring position served by a physical host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Vnode {
    /// Position on the ring.
    pub id: RingKey,
    /// Address of the host serving this vnode (`ip:port`).
    pub host: String,
}

impl Vnode {
    /// Create a new vnode.
    pub fn new(id: RingKey, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
        }
    }

    /// Create the `index`-th vnode of `host`, placed by hashing `host:index`.
    pub fn for_host(host: impl Into<String>, index: usize) -> Self {
        let host = host.into();
        let id = RingKey::for_key(format!("{}:{}", host, index).as_bytes());
        Self { id, host }
    }
}

impl fmt::Display for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.host)
    }
}

/// Whether a replica chain is known to match the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaState {
    /// Every replica in the chain was written and told its place in it.
    Complete,
    /// The chain is partially written or its metadata is stale.
    #[default]
    Incomplete,
}

/// A value held in a vnode's primary table.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// Payload bytes.
    pub data: Bytes,
    /// Write timestamp.
    pub timestamp: SystemTime,
    /// Whether this copy was written as a replica.
    pub is_replica: bool,
    /// Whether the owner has committed this value.
    pub committed: bool,
    /// Sync state of the value's replica chain.
    pub rstate: ReplicaState,
}

impl Value {
    /// Create a fresh, uncommitted primary value stamped now.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp: SystemTime::now(),
            is_replica: false,
            committed: false,
            rstate: ReplicaState::Incomplete,
        }
    }

    /// Mark the value committed.
    pub fn committed(mut self) -> Self {
        self.committed = true;
        self
    }

    /// The copy sent to a replica: same bytes and timestamp, flagged as a
    /// replica, uncommitted and incomplete.
    pub fn to_replica(&self) -> Self {
        Self {
            data: self.data.clone(),
            timestamp: self.timestamp,
            is_replica: true,
            committed: false,
            rstate: ReplicaState::Incomplete,
        }
    }
}

/// A replica copy together with its chain metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaValue {
    /// Payload bytes.
    pub data: Bytes,
    /// Write timestamp of the master copy.
    pub timestamp: SystemTime,
    /// Position in the chain; 0 is the first replica after the primary.
    pub depth: usize,
    /// Sync state of the chain.
    pub state: ReplicaState,
    /// The vnode holding the primary copy.
    pub master: Option<Vnode>,
    /// Every replica holder, in chain order.
    pub chain: Vec<Vnode>,
}

impl ReplicaValue {
    /// Convert to a primary value, copying the payload into a fresh buffer.
    pub fn to_value(&self) -> Value {
        Value {
            data: Bytes::copy_from_slice(&self.data),
            timestamp: self.timestamp,
            is_replica: false,
            committed: false,
            rstate: ReplicaState::Incomplete,
        }
    }

    /// Apply chain metadata received from the master.
    pub fn apply_meta(&mut self, meta: ReplicaMeta) {
        self.depth = meta.depth;
        self.state = meta.state;
        self.master = Some(meta.master);
        self.chain = meta.chain;
    }
}

/// Chain metadata carried by a set-metadata request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaMeta {
    /// Depth of the receiving replica.
    pub depth: usize,
    /// Sync state of the chain.
    pub state: ReplicaState,
    /// The vnode holding the primary copy.
    pub master: Vnode,
    /// Every replica holder, in chain order.
    pub chain: Vec<Vnode>,
}

/// A value staged while it is handed to a new master.
#[derive(Debug, Clone, PartialEq)]
pub struct DemotedItem {
    /// Payload bytes.
    pub data: Bytes,
    /// The original user key.
    pub key: Bytes,
    /// Write timestamp of the value.
    pub timestamp: SystemTime,
    /// The vnode expected to take ownership.
    pub new_master: Vnode,
    /// Replica chain known at demotion time.
    pub chain: Vec<Vnode>,
    /// When the value left the primary table.
    pub demoted_at: SystemTime,
}

impl DemotedItem {
    /// Stage `value` for hand-off to `new_master`.
    pub fn from_value(key: Bytes, value: &Value, new_master: Vnode) -> Self {
        Self {
            data: Bytes::copy_from_slice(&value.data),
            key,
            timestamp: value.timestamp,
            new_master,
            chain: Vec::new(),
            demoted_at: SystemTime::now(),
        }
    }

    /// The value to re-send or restore.
    pub fn to_value(&self) -> Value {
        Value {
            data: self.data.clone(),
            timestamp: self.timestamp,
            is_replica: false,
            committed: false,
            rstate: ReplicaState::Incomplete,
        }
    }
}

/// Per-vnode table counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnodeStatus {
    /// Entries in the primary table.
    pub primary: usize,
    /// Replica entries with a complete chain.
    pub replicas_complete: usize,
    /// Replica entries with an incomplete chain.
    pub replicas_incomplete: usize,
    /// Entries waiting for the new master's cleanup call.
    pub demoted: usize,
}

/// Convert a timestamp to nanoseconds since the Unix epoch.
pub fn to_unix_nanos(ts: SystemTime) -> i64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or_default()
}

/// Convert nanoseconds since the Unix epoch to a timestamp.
pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos.max(0) as u64)
}
