//! Error types for the replicated table.

use crate::network::wire::MsgType;
use crate::types::RingKey;
use std::io;
use thiserror::Error;

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the replicated table.
#[derive(Error, Debug)]
pub enum Error {
    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// A frame or payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The remote call did not answer within the client timeout.
    #[error("operation timed out")]
    Timeout,

    /// The remote side answered with an error message.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote side answered with a message of the wrong type.
    #[error("unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse { expected: MsgType, actual: MsgType },

    /// Ring lookup failed.
    #[error("ring error: {0}")]
    Ring(String),

    /// The vnode has no tables on this node.
    #[error("unknown vnode: {0}")]
    UnknownVnode(RingKey),

    /// A metadata update arrived for a key with no replica copy.
    #[error("no replica for key on vnode {vnode}")]
    NoReplica { vnode: RingKey },

    /// The key is owned by a vnode on another host.
    #[error("key not local, owner is {owner}")]
    NotLocal { owner: String },

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to send message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to receive message.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame exceeds the configured maximum size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Envelope decoding errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The envelope has no type byte.
    #[error("data too short: {len}")]
    TooShort { len: usize },

    /// The type byte is not a known message type.
    #[error("unknown message type {0:#x}")]
    UnknownType(u8),

    /// The payload did not parse as the tagged message type.
    #[error("error decoding {msg_type:?} payload: {source}")]
    Payload {
        msg_type: MsgType,
        #[source]
        source: prost::DecodeError,
    },

    /// A required field was absent from an otherwise valid payload.
    #[error("{msg_type:?} payload missing field `{field}`")]
    MissingField {
        msg_type: MsgType,
        field: &'static str,
    },

    /// A vnode id had the wrong length.
    #[error("invalid vnode id length {0}")]
    InvalidId(usize),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Network(NetworkError::Io(e))
    }
}

impl Error {
    /// Whether the error came from the client timeout rather than the peer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
