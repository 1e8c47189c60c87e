//! Message envelope and protobuf payloads.
//!
//! Every message on the wire is a single type byte followed by the protobuf
//! encoding of the payload for that type:
//!
//! ```text
//! ┌────────┬──────────────────────────────┐
//! │ type   │ protobuf payload             │
//! │ 1 byte │ remaining bytes              │
//! └────────┴──────────────────────────────┘
//! ```
//!
//! Tags `0..=7` are the ring protocol messages. The table layer's own
//! requests use tags from `0x40` so the two ranges never overlap.

use crate::error::{DecodeError, Result};
use crate::network::handler::{self, HandlerFn};
use crate::types::{
    from_unix_nanos, to_unix_nanos, ReplicaMeta, ReplicaState, RingKey, Value, Vnode,
};
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use std::fmt;

/// Version sent in ping requests.
pub const PROTOCOL_VERSION: i64 = 1;

/// Message type tag, the first byte of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Ping = 0,
    Ack = 1,
    Err = 2,
    Forward = 3,
    Join = 4,
    Leave = 5,
    ListVnodes = 6,
    ListVnodesResp = 7,
    Set = 0x40,
    SetMeta = 0x41,
    ClearDemoted = 0x42,
}

impl TryFrom<u8> for MsgType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> std::result::Result<Self, DecodeError> {
        Ok(match tag {
            0 => MsgType::Ping,
            1 => MsgType::Ack,
            2 => MsgType::Err,
            3 => MsgType::Forward,
            4 => MsgType::Join,
            5 => MsgType::Leave,
            6 => MsgType::ListVnodes,
            7 => MsgType::ListVnodesResp,
            0x40 => MsgType::Set,
            0x41 => MsgType::SetMeta,
            0x42 => MsgType::ClearDemoted,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

/// Vnode descriptor.
#[derive(Clone, PartialEq, Message)]
pub struct PbVnode {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub host: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbPing {
    #[prost(int64, tag = "1")]
    pub version: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbAck {
    #[prost(bool, tag = "1")]
    pub ok: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbErr {
    #[prost(string, tag = "1")]
    pub error: String,
}

/// Redirect to the vnode that should answer instead.
#[derive(Clone, PartialEq, Message)]
pub struct PbForward {
    #[prost(message, optional, tag = "1")]
    pub vnode: Option<PbVnode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbJoin {
    #[prost(message, optional, tag = "1")]
    pub source: Option<PbVnode>,
    #[prost(message, optional, tag = "2")]
    pub dest: Option<PbVnode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbLeave {
    #[prost(message, optional, tag = "1")]
    pub source: Option<PbVnode>,
    #[prost(message, optional, tag = "2")]
    pub dest: Option<PbVnode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PbListVnodes {}

#[derive(Clone, PartialEq, Message)]
pub struct PbListVnodesResp {
    #[prost(message, repeated, tag = "1")]
    pub vnodes: Vec<PbVnode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PbReplicaState {
    Incomplete = 0,
    Complete = 1,
}

/// Write a value into the target vnode's tables.
#[derive(Clone, PartialEq, Message)]
pub struct PbSet {
    #[prost(message, optional, tag = "1")]
    pub origin: Option<PbVnode>,
    #[prost(message, optional, tag = "2")]
    pub dest: Option<PbVnode>,
    #[prost(bytes = "bytes", tag = "3")]
    pub key: Bytes,
    #[prost(bytes = "bytes", tag = "4")]
    pub value: Bytes,
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
    #[prost(uint32, tag = "6")]
    pub replica_count: u32,
    #[prost(bool, tag = "7")]
    pub demoting: bool,
    #[prost(bool, tag = "8")]
    pub is_replica: bool,
    #[prost(uint32, tag = "9")]
    pub depth: u32,
}

/// Replace the chain metadata of a replica entry.
#[derive(Clone, PartialEq, Message)]
pub struct PbSetMeta {
    #[prost(message, optional, tag = "1")]
    pub dest: Option<PbVnode>,
    #[prost(bytes = "bytes", tag = "2")]
    pub key: Bytes,
    #[prost(uint32, tag = "3")]
    pub depth: u32,
    #[prost(enumeration = "PbReplicaState", tag = "4")]
    pub state: i32,
    #[prost(message, optional, tag = "5")]
    pub master: Option<PbVnode>,
    #[prost(message, repeated, tag = "6")]
    pub chain: Vec<PbVnode>,
}

/// Sent by a new master once it owns a demoted key.
#[derive(Clone, PartialEq, Message)]
pub struct PbClearDemoted {
    #[prost(message, optional, tag = "1")]
    pub dest: Option<PbVnode>,
    #[prost(bytes = "bytes", tag = "2")]
    pub key: Bytes,
    #[prost(message, optional, tag = "3")]
    pub new_master: Option<PbVnode>,
}

/// Decoded payload of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ping(PbPing),
    Ack(PbAck),
    Err(PbErr),
    Forward(PbForward),
    Join(PbJoin),
    Leave(PbLeave),
    ListVnodes(PbListVnodes),
    ListVnodesResp(PbListVnodesResp),
    Set(PbSet),
    SetMeta(PbSetMeta),
    ClearDemoted(PbClearDemoted),
}

impl Payload {
    /// The type tag this payload travels under.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Payload::Ping(_) => MsgType::Ping,
            Payload::Ack(_) => MsgType::Ack,
            Payload::Err(_) => MsgType::Err,
            Payload::Forward(_) => MsgType::Forward,
            Payload::Join(_) => MsgType::Join,
            Payload::Leave(_) => MsgType::Leave,
            Payload::ListVnodes(_) => MsgType::ListVnodes,
            Payload::ListVnodesResp(_) => MsgType::ListVnodesResp,
            Payload::Set(_) => MsgType::Set,
            Payload::SetMeta(_) => MsgType::SetMeta,
            Payload::ClearDemoted(_) => MsgType::ClearDemoted,
        }
    }

    /// Protobuf encoding of the payload alone.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        match self {
            Payload::Ping(m) => m.encode_to_vec(),
            Payload::Ack(m) => m.encode_to_vec(),
            Payload::Err(m) => m.encode_to_vec(),
            Payload::Forward(m) => m.encode_to_vec(),
            Payload::Join(m) => m.encode_to_vec(),
            Payload::Leave(m) => m.encode_to_vec(),
            Payload::ListVnodes(m) => m.encode_to_vec(),
            Payload::ListVnodesResp(m) => m.encode_to_vec(),
            Payload::Set(m) => m.encode_to_vec(),
            Payload::SetMeta(m) => m.encode_to_vec(),
            Payload::ClearDemoted(m) => m.encode_to_vec(),
        }
    }

    fn decode(msg_type: MsgType, data: &[u8]) -> std::result::Result<Self, prost::DecodeError> {
        Ok(match msg_type {
            MsgType::Ping => Payload::Ping(PbPing::decode(data)?),
            MsgType::Ack => Payload::Ack(PbAck::decode(data)?),
            MsgType::Err => Payload::Err(PbErr::decode(data)?),
            MsgType::Forward => Payload::Forward(PbForward::decode(data)?),
            MsgType::Join => Payload::Join(PbJoin::decode(data)?),
            MsgType::Leave => Payload::Leave(PbLeave::decode(data)?),
            MsgType::ListVnodes => Payload::ListVnodes(PbListVnodes::decode(data)?),
            MsgType::ListVnodesResp => Payload::ListVnodesResp(PbListVnodesResp::decode(data)?),
            MsgType::Set => Payload::Set(PbSet::decode(data)?),
            MsgType::SetMeta => Payload::SetMeta(PbSetMeta::decode(data)?),
            MsgType::ClearDemoted => Payload::ClearDemoted(PbClearDemoted::decode(data)?),
        })
    }
}

/// A message envelope: type tag, raw payload, decoded payload and the
/// server-side handler for requests.
#[derive(Clone)]
pub struct ChordMsg {
    /// Type tag.
    pub msg_type: MsgType,
    /// Payload bytes following the tag.
    pub data: Bytes,
    /// Decoded payload.
    pub payload: Payload,
    /// Handler bound at decode time; `None` for response types.
    pub handler: Option<HandlerFn>,
}

impl fmt::Debug for ChordMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChordMsg")
            .field("msg_type", &self.msg_type)
            .field("len", &self.data.len())
            .field("payload", &self.payload)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl ChordMsg {
    /// Build an outbound message from a payload.
    pub fn new(payload: Payload) -> Self {
        let msg_type = payload.msg_type();
        Self {
            msg_type,
            data: Bytes::from(payload.encode_to_vec()),
            payload,
            handler: handler_for(msg_type),
        }
    }

    /// An error response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Payload::Err(PbErr {
            error: message.into(),
        }))
    }

    /// A positive acknowledgement.
    pub fn ack() -> Self {
        Self::new(Payload::Ack(PbAck { ok: true }))
    }

    /// Full envelope bytes.
    pub fn to_bytes(&self) -> Bytes {
        encode(self.msg_type, &self.data)
    }
}

/// Prepend the type tag to a serialized payload.
pub fn encode(msg_type: MsgType, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + data.len());
    buf.put_u8(msg_type as u8);
    buf.put_slice(data);
    buf.freeze()
}

/// Decode an envelope into a typed message with its handler bound.
pub fn decode(data: &[u8]) -> Result<ChordMsg> {
    if data.is_empty() {
        return Err(DecodeError::TooShort { len: 0 }.into());
    }

    let msg_type = MsgType::try_from(data[0])?;
    let body = Bytes::copy_from_slice(&data[1..]);
    let payload = Payload::decode(msg_type, &body)
        .map_err(|source| DecodeError::Payload { msg_type, source })?;

    Ok(ChordMsg {
        msg_type,
        data: body,
        payload,
        handler: handler_for(msg_type),
    })
}

fn handler_for(msg_type: MsgType) -> Option<HandlerFn> {
    let bound: HandlerFn = match msg_type {
        MsgType::Ping => handler::handle_ping,
        MsgType::Join => handler::handle_join,
        MsgType::Leave => handler::handle_leave,
        MsgType::ListVnodes => handler::handle_list_vnodes,
        MsgType::Set => handler::handle_set,
        MsgType::SetMeta => handler::handle_set_meta,
        MsgType::ClearDemoted => handler::handle_clear_demoted,
        MsgType::Ack | MsgType::Err | MsgType::Forward | MsgType::ListVnodesResp => return None,
    };
    Some(bound)
}

impl From<&Vnode> for PbVnode {
    fn from(vnode: &Vnode) -> Self {
        Self {
            id: vnode.id.as_bytes().to_vec(),
            host: vnode.host.clone(),
        }
    }
}

impl TryFrom<&PbVnode> for Vnode {
    type Error = DecodeError;

    fn try_from(pb: &PbVnode) -> std::result::Result<Self, DecodeError> {
        let id = RingKey::from_slice(&pb.id).ok_or(DecodeError::InvalidId(pb.id.len()))?;
        Ok(Vnode::new(id, pb.host.clone()))
    }
}

fn required_vnode(
    vnode: Option<&PbVnode>,
    msg_type: MsgType,
    field: &'static str,
) -> std::result::Result<Vnode, DecodeError> {
    let pb = vnode.ok_or(DecodeError::MissingField { msg_type, field })?;
    Vnode::try_from(pb)
}

/// Decode an ordered list of vnode descriptors.
pub fn vnodes_from_pb(vnodes: &[PbVnode]) -> std::result::Result<Vec<Vnode>, DecodeError> {
    vnodes.iter().map(Vnode::try_from).collect()
}

impl From<ReplicaState> for PbReplicaState {
    fn from(state: ReplicaState) -> Self {
        match state {
            ReplicaState::Complete => PbReplicaState::Complete,
            ReplicaState::Incomplete => PbReplicaState::Incomplete,
        }
    }
}

impl From<PbReplicaState> for ReplicaState {
    fn from(state: PbReplicaState) -> Self {
        match state {
            PbReplicaState::Complete => ReplicaState::Complete,
            PbReplicaState::Incomplete => ReplicaState::Incomplete,
        }
    }
}

/// A decoded set request.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    /// The vnode issuing the write.
    pub origin: Vnode,
    /// The vnode that should store the value.
    pub target: Vnode,
    /// User key.
    pub key: Bytes,
    /// Value to store.
    pub value: Value,
    /// Replication factor the receiver should establish (demotions).
    pub replica_count: usize,
    /// Whether this hands primary ownership to the target.
    pub demoting: bool,
    /// Chain depth of a replica copy.
    pub depth: usize,
}

impl From<&SetRequest> for PbSet {
    fn from(req: &SetRequest) -> Self {
        Self {
            origin: Some(PbVnode::from(&req.origin)),
            dest: Some(PbVnode::from(&req.target)),
            key: req.key.clone(),
            value: req.value.data.clone(),
            timestamp: to_unix_nanos(req.value.timestamp),
            replica_count: req.replica_count as u32,
            demoting: req.demoting,
            is_replica: req.value.is_replica,
            depth: req.depth as u32,
        }
    }
}

impl TryFrom<&PbSet> for SetRequest {
    type Error = DecodeError;

    fn try_from(pb: &PbSet) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            origin: required_vnode(pb.origin.as_ref(), MsgType::Set, "origin")?,
            target: required_vnode(pb.dest.as_ref(), MsgType::Set, "dest")?,
            key: pb.key.clone(),
            value: Value {
                data: pb.value.clone(),
                timestamp: from_unix_nanos(pb.timestamp),
                is_replica: pb.is_replica,
                committed: false,
                rstate: ReplicaState::Incomplete,
            },
            replica_count: pb.replica_count as usize,
            demoting: pb.demoting,
            depth: pb.depth as usize,
        })
    }
}

/// A decoded set-metadata request.
#[derive(Debug, Clone, PartialEq)]
pub struct SetMetaRequest {
    /// The replica holder being updated.
    pub target: Vnode,
    /// User key.
    pub key: Bytes,
    /// New chain metadata.
    pub meta: ReplicaMeta,
}

impl From<&SetMetaRequest> for PbSetMeta {
    fn from(req: &SetMetaRequest) -> Self {
        Self {
            dest: Some(PbVnode::from(&req.target)),
            key: req.key.clone(),
            depth: req.meta.depth as u32,
            state: PbReplicaState::from(req.meta.state) as i32,
            master: Some(PbVnode::from(&req.meta.master)),
            chain: req.meta.chain.iter().map(PbVnode::from).collect(),
        }
    }
}

impl TryFrom<&PbSetMeta> for SetMetaRequest {
    type Error = DecodeError;

    fn try_from(pb: &PbSetMeta) -> std::result::Result<Self, DecodeError> {
        let state = PbReplicaState::try_from(pb.state).unwrap_or(PbReplicaState::Incomplete);
        Ok(Self {
            target: required_vnode(pb.dest.as_ref(), MsgType::SetMeta, "dest")?,
            key: pb.key.clone(),
            meta: ReplicaMeta {
                depth: pb.depth as usize,
                state: state.into(),
                master: required_vnode(pb.master.as_ref(), MsgType::SetMeta, "master")?,
                chain: vnodes_from_pb(&pb.chain)?,
            },
        })
    }
}

/// A decoded clear-demoted request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClearDemotedRequest {
    /// The vnode holding the staged item.
    pub target: Vnode,
    /// User key.
    pub key: Bytes,
    /// The vnode that took ownership.
    pub new_master: Vnode,
}

impl From<&ClearDemotedRequest> for PbClearDemoted {
    fn from(req: &ClearDemotedRequest) -> Self {
        Self {
            dest: Some(PbVnode::from(&req.target)),
            key: req.key.clone(),
            new_master: Some(PbVnode::from(&req.new_master)),
        }
    }
}

impl TryFrom<&PbClearDemoted> for ClearDemotedRequest {
    type Error = DecodeError;

    fn try_from(pb: &PbClearDemoted) -> std::result::Result<Self, DecodeError> {
        Ok(Self {
            target: required_vnode(pb.dest.as_ref(), MsgType::ClearDemoted, "dest")?,
            key: pb.key.clone(),
            new_master: required_vnode(
                pb.new_master.as_ref(),
                MsgType::ClearDemoted,
                "new_master",
            )?,
        })
    }
}
