//! Replicated key-value table over a consistent-hashing ring.
//!
//! This crate provides the replication core of a ring-partitioned table:
//! - **Chained replication** of each key to the next remote vnodes on the ring
//! - **Promotion** of first replicas when a master vnode leaves
//! - **Demotion** of keys to a newly joined predecessor, confirmed by the new
//!   master before the old one forgets them
//! - A **length-prefixed protobuf wire protocol** with a timeout-bounded client
//!
//! # Example
//!
//! ```rust,no_run
//! use ringtable::{DTable, RpcClient, StaticRing, TableConfig};
//! use ringtable::network::NetworkServer;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TableConfig::new("127.0.0.1:9000")
//!         .with_replicas(2)
//!         .with_client_timeout(Duration::from_secs(2));
//!
//!     let ring = Arc::new(StaticRing::from_config(&config));
//!     ring.add_host("127.0.0.1:9000", 4);
//!
//!     let client = Arc::new(RpcClient::new(config.rpc.clone()));
//!     let max_message_size = config.rpc.max_message_size;
//!     let table = Arc::new(DTable::new(config, ring.clone(), ring.clone(), client)?);
//!     for vnode in ringtable::ring::Ring::my_vnodes(ring.as_ref()) {
//!         table.register_vnode(&vnode);
//!     }
//!
//!     let (server, _shutdown) =
//!         NetworkServer::bind("127.0.0.1:9000".parse()?, table.clone(), max_message_size).await?;
//!     tokio::spawn(server.run());
//!
//!     table.set("user:123", "Alice").await?;
//!     if let Some(value) = table.get(b"user:123").await? {
//!         println!("Found: {:?}", value);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               DTable                        │
//! │  • set / get                                │
//! │  • delegate(ring event)                     │
//! └─────────────────────────────────────────────┘
//!        │                │               │
//!        ▼                ▼               ▼
//! ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │    Ring    │   │ Replicator │   │TableManager│
//! │ (lookups)  │   │  (chains)  │   │ (per vnode)│
//! └────────────┘   └────────────┘   └────────────┘
//!                        │
//!                        ▼
//!              ┌───────────────────┐
//!              │ TableClient (RPC) │ ◄──► NetworkServer
//!              └───────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Writes**: committed on the master, then copied down the chain one
//!   replica at a time; a failed copy leaves the chain marked incomplete
//! - **Reads**: served by the master vnode only
//! - **Membership changes**: keys are re-decided by ring lookups on every
//!   predecessor event, so a stale decision is corrected on the next one

pub mod cluster;
pub mod config;
pub mod error;
pub mod network;
pub mod ring;
pub mod store;
pub mod table;
pub mod testing;
pub mod types;

// Re-export main types for convenience
pub use config::{RpcConfig, TableConfig};
pub use error::{Error, Result};
pub use table::{DTable, ReplicationOutcome, Replicator};
pub use types::{
    DemotedItem, ReplicaMeta, ReplicaState, ReplicaValue, RingKey, Value, Vnode, VnodeStatus,
};

// Re-export cluster types
pub use cluster::{RingEvent, RingEventListener};

// Re-export network types
pub use network::{
    ChordMsg, MsgType, NetworkServer, Payload, RequestHandler, RpcClient, TableClient,
};

// Re-export ring types
pub use ring::{between, Ring, RingChange, StaticRing, VnodeDirectory, VnodeHandler};

// Re-export store types
pub use store::{SharedTables, TableManager, VnodeTables};
