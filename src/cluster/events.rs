//! Ring membership events.

use crate::types::Vnode;
use async_trait::async_trait;

/// A change in the neighbourhood of a local vnode.
///
/// Events are delivered together with the local vnode they concern and the
/// other vnode that joined, left or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingEvent {
    /// The local vnode's predecessor left the ring.
    PredecessorLeft,

    /// A new vnode joined as the local vnode's predecessor.
    PredecessorJoined,

    /// The local vnode's replica set changed.
    ReplicasChanged,

    /// A new vnode joined as the local vnode's successor.
    SuccessorJoined,

    /// The local vnode's successor left the ring.
    SuccessorLeft,
}

/// Listener for ring events.
#[async_trait]
pub trait RingEventListener: Send + Sync + 'static {
    /// Called when `event` happens to `local` because of `other`.
    async fn on_event(&self, local: &Vnode, other: &Vnode, event: RingEvent);
}
