//! Server-side request handling.
//!
//! Decoding an envelope binds one of the `handle_*` functions below to it.
//! The server calls that function with its [`RequestHandler`] to turn the
//! request into a response envelope.

use crate::error::{Error, Result};
use crate::network::wire::{
    ChordMsg, ClearDemotedRequest, Payload, PbListVnodesResp, PbPing, PbVnode,
    SetMetaRequest, SetRequest,
};
use crate::types::Vnode;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

/// A boxed future borrowing from the handler and the request.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler function bound to a decoded request.
pub type HandlerFn = for<'a> fn(&'a dyn RequestHandler, &'a ChordMsg) -> BoxFuture<'a, ChordMsg>;

/// The operations a node serves to its peers.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Answer a ping, returning the version to echo.
    async fn ping(&self, version: i64) -> Result<i64> {
        Ok(version)
    }

    /// Vnodes served by this host.
    async fn list_vnodes(&self) -> Result<Vec<Vnode>>;

    /// A vnode asks to join through `dest`.
    async fn join(&self, source: Option<Vnode>, dest: Option<Vnode>) -> Result<()> {
        let _ = (source, dest);
        Err(Error::Internal("join is handled by the ring".into()))
    }

    /// A vnode announces it is leaving.
    async fn leave(&self, source: Option<Vnode>, dest: Option<Vnode>) -> Result<()> {
        let _ = (source, dest);
        Err(Error::Internal("leave is handled by the ring".into()))
    }

    /// Store a primary value, a replica copy or a demoted value.
    async fn set(&self, req: SetRequest) -> Result<()>;

    /// Replace the chain metadata of a replica entry.
    async fn set_meta(&self, req: SetMetaRequest) -> Result<()>;

    /// Drop a staged demoted item after its new master took it.
    async fn clear_demoted(&self, req: ClearDemotedRequest) -> Result<()>;
}

fn respond(result: Result<()>) -> ChordMsg {
    match result {
        Ok(()) => ChordMsg::ack(),
        Err(e) => ChordMsg::error(e.to_string()),
    }
}

fn mismatched(msg: &ChordMsg) -> ChordMsg {
    ChordMsg::error(format!("payload does not match type {:?}", msg.msg_type))
}

fn optional_vnode(pb: Option<&PbVnode>) -> Option<Vnode> {
    pb.and_then(|v| Vnode::try_from(v).ok())
}

pub(crate) fn handle_ping<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::Ping(ping) = &msg.payload else {
            return mismatched(msg);
        };
        match handler.ping(ping.version).await {
            Ok(version) => ChordMsg::new(Payload::Ping(PbPing { version })),
            Err(e) => ChordMsg::error(e.to_string()),
        }
    })
}

pub(crate) fn handle_list_vnodes<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        if !matches!(msg.payload, Payload::ListVnodes(_)) {
            return mismatched(msg);
        }
        match handler.list_vnodes().await {
            Ok(vnodes) => ChordMsg::new(Payload::ListVnodesResp(PbListVnodesResp {
                vnodes: vnodes.iter().map(PbVnode::from).collect(),
            })),
            Err(e) => ChordMsg::error(e.to_string()),
        }
    })
}

pub(crate) fn handle_join<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::Join(join) = &msg.payload else {
            return mismatched(msg);
        };
        let source = optional_vnode(join.source.as_ref());
        let dest = optional_vnode(join.dest.as_ref());
        respond(handler.join(source, dest).await)
    })
}

pub(crate) fn handle_leave<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::Leave(leave) = &msg.payload else {
            return mismatched(msg);
        };
        let source = optional_vnode(leave.source.as_ref());
        let dest = optional_vnode(leave.dest.as_ref());
        respond(handler.leave(source, dest).await)
    })
}

pub(crate) fn handle_set<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::Set(pb) = &msg.payload else {
            return mismatched(msg);
        };
        match SetRequest::try_from(pb) {
            Ok(req) => respond(handler.set(req).await),
            Err(e) => ChordMsg::error(e.to_string()),
        }
    })
}

pub(crate) fn handle_set_meta<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::SetMeta(pb) = &msg.payload else {
            return mismatched(msg);
        };
        match SetMetaRequest::try_from(pb) {
            Ok(req) => respond(handler.set_meta(req).await),
            Err(e) => ChordMsg::error(e.to_string()),
        }
    })
}

pub(crate) fn handle_clear_demoted<'a>(
    handler: &'a dyn RequestHandler,
    msg: &'a ChordMsg,
) -> BoxFuture<'a, ChordMsg> {
    Box::pin(async move {
        let Payload::ClearDemoted(pb) = &msg.payload else {
            return mismatched(msg);
        };
        match ClearDemotedRequest::try_from(pb) {
            Ok(req) => respond(handler.clear_demoted(req).await),
            Err(e) => ChordMsg::error(e.to_string()),
        }
    })
}
