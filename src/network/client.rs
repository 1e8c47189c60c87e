//! Timeout-bounded request/response client.
//!
//! [`RpcClient`] opens a fresh connection per call on a spawned task, sends
//! one frame and waits for one frame back. The caller races three outcomes:
//! the client timeout, a transport or decode error, and a decoded response.
//! Exactly one of them resolves the call. The task is aborted whenever the
//! call ends, including when the caller drops the future early.

use crate::config::RpcConfig;
use crate::error::{Error, NetworkError, Result};
use crate::network::server::{read_frame, write_frame};
use crate::network::wire::{
    decode, vnodes_from_pb, ChordMsg, ClearDemotedRequest, MsgType, Payload, PbClearDemoted,
    PbListVnodes, PbPing, PbSet, PbSetMeta, SetMetaRequest, SetRequest, PROTOCOL_VERSION,
};
use crate::types::Vnode;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Outbound calls the table makes to its peers.
#[async_trait]
pub trait TableClient: Send + Sync + 'static {
    /// Check that the host serving `vnode` answers.
    async fn ping(&self, vnode: &Vnode) -> Result<bool>;

    /// Fetch the vnodes served by `host`.
    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>>;

    /// Store a value on `req.target`.
    async fn set(&self, req: SetRequest) -> Result<()>;

    /// Replace replica chain metadata on `req.target`.
    async fn set_meta(&self, req: SetMetaRequest) -> Result<()>;

    /// Tell `req.target` its demoted item reached the new master.
    async fn clear_demoted(&self, req: ClearDemotedRequest) -> Result<()>;
}

/// One request/response exchange with a host.
///
/// Every `Exchange` is a [`TableClient`]; the typed calls are built on top
/// of the raw envelopes it moves.
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    /// Send `request` to `host` and return the response envelope.
    async fn exchange(&self, host: &str, request: ChordMsg) -> Result<ChordMsg>;
}

/// Check a response envelope and return its payload if it has type
/// `expected`.
pub(crate) fn expect_payload(response: ChordMsg, expected: MsgType) -> Result<Payload> {
    match response.payload {
        Payload::Err(err) => Err(Error::Remote(err.error)),
        payload if payload.msg_type() == expected => Ok(payload),
        payload => Err(Error::UnexpectedResponse {
            expected,
            actual: payload.msg_type(),
        }),
    }
}

async fn call<E>(exchange: &E, host: &str, request: ChordMsg, expected: MsgType) -> Result<Payload>
where
    E: Exchange + ?Sized,
{
    let response = exchange.exchange(host, request).await?;
    expect_payload(response, expected)
}

async fn call_ack<E>(exchange: &E, host: &str, request: ChordMsg) -> Result<()>
where
    E: Exchange + ?Sized,
{
    match call(exchange, host, request, MsgType::Ack).await? {
        Payload::Ack(ack) if ack.ok => Ok(()),
        Payload::Ack(_) => Err(Error::Remote("request not acknowledged".into())),
        other => Err(Error::UnexpectedResponse {
            expected: MsgType::Ack,
            actual: other.msg_type(),
        }),
    }
}

#[async_trait]
impl<E: Exchange> TableClient for E {
    async fn ping(&self, vnode: &Vnode) -> Result<bool> {
        let request = ChordMsg::new(Payload::Ping(PbPing {
            version: PROTOCOL_VERSION,
        }));
        match call(self, &vnode.host, request, MsgType::Ping).await? {
            Payload::Ping(pong) => {
                debug!(vnode = %vnode, version = pong.version, "Got pong");
                Ok(true)
            }
            other => Err(Error::UnexpectedResponse {
                expected: MsgType::Ping,
                actual: other.msg_type(),
            }),
        }
    }

    async fn list_vnodes(&self, host: &str) -> Result<Vec<Vnode>> {
        let request = ChordMsg::new(Payload::ListVnodes(PbListVnodes {}));
        match call(self, host, request, MsgType::ListVnodesResp).await? {
            Payload::ListVnodesResp(resp) => Ok(vnodes_from_pb(&resp.vnodes)?),
            other => Err(Error::UnexpectedResponse {
                expected: MsgType::ListVnodesResp,
                actual: other.msg_type(),
            }),
        }
    }

    async fn set(&self, req: SetRequest) -> Result<()> {
        let request = ChordMsg::new(Payload::Set(PbSet::from(&req)));
        call_ack(self, &req.target.host, request).await
    }

    async fn set_meta(&self, req: SetMetaRequest) -> Result<()> {
        let request = ChordMsg::new(Payload::SetMeta(PbSetMeta::from(&req)));
        call_ack(self, &req.target.host, request).await
    }

    async fn clear_demoted(&self, req: ClearDemotedRequest) -> Result<()> {
        let request = ChordMsg::new(Payload::ClearDemoted(PbClearDemoted::from(&req)));
        call_ack(self, &req.target.host, request).await
    }
}

/// TCP transport: one connection per call, bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct RpcClient {
    config: RpcConfig,
}

impl RpcClient {
    /// Create a client with the given configuration.
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    async fn round_trip(
        addr: &str,
        frame: Bytes,
        connect_timeout: Duration,
        max_size: usize,
    ) -> Result<ChordMsg> {
        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: "connect timed out".into(),
            })?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        write_frame(&mut stream, &frame).await?;

        let data = read_frame(&mut stream, max_size)
            .await?
            .ok_or(NetworkError::ConnectionClosed)?;
        decode(&data)
    }
}

/// Aborts the round-trip task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl Exchange for RpcClient {
    async fn exchange(&self, host: &str, request: ChordMsg) -> Result<ChordMsg> {
        let (error_tx, error_rx) = oneshot::channel::<Error>();
        let (resp_tx, resp_rx) = oneshot::channel::<ChordMsg>();

        let addr = host.to_string();
        let frame = request.to_bytes();
        let connect_timeout = self.config.connect_timeout;
        let max_size = self.config.max_message_size;

        trace!(host, msg_type = ?request.msg_type, "Sending request");

        let _task = AbortOnDrop(tokio::spawn(async move {
            match Self::round_trip(&addr, frame, connect_timeout, max_size).await {
                Ok(response) => {
                    let _ = resp_tx.send(response);
                }
                Err(e) => {
                    let _ = error_tx.send(e);
                }
            }
        }));

        tokio::select! {
            _ = tokio::time::sleep(self.config.timeout) => {
                debug!(host, msg_type = ?request.msg_type, "Request timed out");
                Err(Error::Timeout)
            }
            Ok(e) = error_rx => Err(e),
            Ok(response) = resp_rx => Ok(response),
        }
    }
}
