//! Ring topology seams consumed by the table.
//!
//! The table never computes placement itself. It asks a [`Ring`] for the
//! successors of a key and a [`VnodeDirectory`] for the handlers of its local
//! vnodes. [`StaticRing`] implements both for tests and single-process use.

mod static_ring;

pub use static_ring::{RingChange, StaticRing};

use crate::error::Result;
use crate::types::{RingKey, Vnode};
use async_trait::async_trait;
use std::sync::Arc;

/// Whether `key` lies on the ring arc from `id1` to `id2`.
///
/// The left end is always excluded; `right_inclusive` controls the right end.
/// When `id1 > id2` the arc wraps through zero. `id1 == id2` is an empty arc.
pub fn between(id1: &RingKey, id2: &RingKey, key: &RingKey, right_inclusive: bool) -> bool {
    let below_right = if right_inclusive { key <= id2 } else { key < id2 };

    if id1 > id2 {
        id1 < key || below_right
    } else {
        id1 < key && below_right
    }
}

/// Read-only view of ring membership.
#[async_trait]
pub trait Ring: Send + Sync + 'static {
    /// Up to `n` successor vnodes of `key`, nearest first.
    async fn lookup(&self, n: usize, key: &[u8]) -> Result<Vec<Vnode>>;

    /// Vnodes served by this process.
    fn my_vnodes(&self) -> Vec<Vnode>;

    /// Replication factor.
    fn replicas(&self) -> usize;
}

/// Per-vnode ring operations.
#[async_trait]
pub trait VnodeHandler: Send + Sync + 'static {
    /// Up to `limit` successors of this vnode living on other hosts.
    async fn find_remote_successors(&self, limit: usize) -> Result<Vec<Vnode>>;
}

/// Lookup of the handler for a local vnode.
pub trait VnodeDirectory: Send + Sync + 'static {
    /// The handler for `vnode`, if this process serves it.
    fn vnode_handler(&self, vnode: &Vnode) -> Option<Arc<dyn VnodeHandler>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(n: u64) -> RingKey {
        RingKey::from_u64(n)
    }

    #[test]
    fn test_between_plain_range() {
        assert!(between(&k(10), &k(20), &k(15), false));
        assert!(!between(&k(10), &k(20), &k(10), false));
        assert!(!between(&k(10), &k(20), &k(20), false));
        assert!(between(&k(10), &k(20), &k(20), true));
        assert!(!between(&k(10), &k(20), &k(25), true));
        assert!(!between(&k(10), &k(20), &k(5), true));
    }

    #[test]
    fn test_between_wraps() {
        assert!(between(&k(200), &k(10), &k(250), false));
        assert!(between(&k(200), &k(10), &k(0), false));
        assert!(between(&k(200), &k(10), &k(5), false));
        assert!(!between(&k(200), &k(10), &k(10), false));
        assert!(between(&k(200), &k(10), &k(10), true));
        assert!(!between(&k(200), &k(10), &k(100), true));
        assert!(!between(&k(200), &k(10), &k(200), true));
    }

    #[test]
    fn test_between_wraps_at_max() {
        assert!(between(&k(u64::MAX - 1), &k(1), &k(u64::MAX), false));
        assert!(between(&k(u64::MAX - 1), &k(1), &k(0), false));
    }

    #[test]
    fn test_between_equal_ends_is_empty() {
        assert!(!between(&k(7), &k(7), &k(7), false));
        assert!(!between(&k(7), &k(7), &k(8), false));
        assert!(!between(&k(7), &k(7), &k(6), false));
    }
}
