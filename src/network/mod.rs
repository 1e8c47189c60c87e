//! Network communication layer.

pub mod client;
pub mod handler;
pub mod server;
pub mod wire;

pub use client::{Exchange, RpcClient, TableClient};
pub use handler::{HandlerFn, RequestHandler};
pub use server::{dispatch, NetworkServer};
pub use wire::{decode, encode, ChordMsg, MsgType, Payload};
