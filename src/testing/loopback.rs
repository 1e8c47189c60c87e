//! In-process transport that routes requests through the wire codec.

use crate::error::{Error, NetworkError, Result};
use crate::network::client::Exchange;
use crate::network::handler::RequestHandler;
use crate::network::server::dispatch;
use crate::network::wire::{decode, ChordMsg};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Delivers requests to handlers registered by host, encoding and decoding
/// each message the way the TCP path does.
///
/// Handlers are held weakly so a table can own a client that points back
/// at itself.
#[derive(Default)]
pub struct LoopbackClient {
    /// Handlers by host address.
    handlers: RwLock<HashMap<String, Weak<dyn RequestHandler>>>,

    /// Hosts currently unreachable.
    down: RwLock<HashSet<String>>,
}

impl LoopbackClient {
    /// Create a transport with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests for `host` to `handler`.
    pub fn register<H: RequestHandler>(&self, host: impl Into<String>, handler: &Arc<H>) {
        let weak: Weak<dyn RequestHandler> = Arc::downgrade(handler) as Weak<dyn RequestHandler>;
        self.handlers.write().insert(host.into(), weak);
    }

    /// Make `host` unreachable until [`Self::bring_up`].
    pub fn take_down(&self, host: &str) {
        self.down.write().insert(host.to_string());
    }

    /// Make `host` reachable again.
    pub fn bring_up(&self, host: &str) {
        self.down.write().remove(host);
    }

    fn handler(&self, host: &str) -> Result<Arc<dyn RequestHandler>> {
        if self.down.read().contains(host) {
            return Err(unreachable(host, "host is down"));
        }
        self.handlers
            .read()
            .get(host)
            .and_then(Weak::upgrade)
            .ok_or_else(|| unreachable(host, "no handler registered"))
    }
}

fn unreachable(host: &str, reason: &str) -> Error {
    Error::Network(NetworkError::ConnectionFailed {
        addr: host.to_string(),
        reason: reason.to_string(),
    })
}

#[async_trait]
impl Exchange for LoopbackClient {
    async fn exchange(&self, host: &str, request: ChordMsg) -> Result<ChordMsg> {
        let handler = self.handler(host)?;
        trace!(host, msg_type = ?request.msg_type, "Loopback request");

        let response = dispatch(handler.as_ref(), &request.to_bytes()).await;
        decode(&response.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client::TableClient;
    use crate::testing::{vnode, StaticHandler};

    #[tokio::test]
    async fn test_routes_by_host() {
        let client = LoopbackClient::new();
        let handler = Arc::new(StaticHandler::new(vec![vnode(3, "a:1"), vnode(9, "a:1")]));
        client.register("a:1", &handler);

        let vnodes = client.list_vnodes("a:1").await.unwrap();
        assert_eq!(vnodes, vec![vnode(3, "a:1"), vnode(9, "a:1")]);
        assert!(client.ping(&vnode(3, "a:1")).await.unwrap());

        assert!(matches!(
            client.list_vnodes("b:1").await,
            Err(Error::Network(NetworkError::ConnectionFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_down_host_and_dropped_handler() {
        let client = LoopbackClient::new();
        let handler = Arc::new(StaticHandler::default());
        client.register("a:1", &handler);

        client.take_down("a:1");
        assert!(client.ping(&vnode(1, "a:1")).await.is_err());
        client.bring_up("a:1");
        assert!(client.ping(&vnode(1, "a:1")).await.is_ok());

        drop(handler);
        assert!(client.ping(&vnode(1, "a:1")).await.is_err());
    }

    #[tokio::test]
    async fn test_set_arrives_decoded() {
        let client = LoopbackClient::new();
        let handler = Arc::new(StaticHandler::default());
        client.register("a:1", &handler);

        client
            .set(crate::network::wire::SetRequest {
                origin: vnode(2, "b:1"),
                target: vnode(1, "a:1"),
                key: bytes::Bytes::from_static(b"k"),
                value: crate::types::Value::new(&b"v"[..]).to_replica(),
                replica_count: 0,
                demoting: false,
                depth: 1,
            })
            .await
            .unwrap();

        let received = handler.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].origin, vnode(2, "b:1"));
        assert_eq!(received[0].key, bytes::Bytes::from_static(b"k"));
        assert_eq!(received[0].depth, 1);
        assert!(received[0].value.is_replica);
    }

    #[tokio::test]
    async fn test_remote_error_crosses_the_codec() {
        let client = LoopbackClient::new();
        let handler = Arc::new(StaticHandler::default());
        client.register("a:1", &handler);

        let err = client
            .set_meta(crate::network::wire::SetMetaRequest {
                target: vnode(1, "a:1"),
                key: bytes::Bytes::from_static(b"k"),
                meta: crate::types::ReplicaMeta {
                    depth: 0,
                    state: crate::types::ReplicaState::Complete,
                    master: vnode(2, "b:1"),
                    chain: vec![vnode(1, "a:1")],
                },
            })
            .await
            .unwrap_err();
        match err {
            Error::Remote(message) => assert!(message.starts_with("no replica")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
