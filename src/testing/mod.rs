//! Testing utilities for the replicated table.
//!
//! This module provides:
//! - Scriptable ring and client doubles for exercising one node in isolation
//! - An in-process transport that still goes through the wire codec
//! - A small multi-host cluster wired over that transport
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TestCluster                           │
//! │                                                              │
//! │   StaticRing (shared membership, one view per host)          │
//! │        │                                                     │
//! │        ▼                                                     │
//! │   DTable(a) ──┐      ┌──────────────────┐      ┌── DTable(b) │
//! │               ├─────►│  LoopbackClient  │◄─────┤             │
//! │   DTable(c) ──┘      │ encode ► dispatch│      └── ...       │
//! │                      │ ► decode         │                    │
//! │                      └──────────────────┘                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use ringtable::testing::{vnode, TestCluster};
//!
//! let mut cluster = TestCluster::new(2);
//! cluster.add_host("127.0.0.1:7001")?;
//! cluster.add_host("127.0.0.1:7002")?;
//! cluster.add_vnode(vnode(1 << 62, "127.0.0.1:7001")).await?;
//! cluster.add_vnode(vnode(3 << 62, "127.0.0.1:7002")).await?;
//!
//! let node = cluster.node("127.0.0.1:7001")?;
//! node.set("user:1", "alice").await?;
//! ```

mod cluster;
mod loopback;
mod mocks;
pub mod utils;

mod cluster_tests;
mod migration_tests;

pub use cluster::TestCluster;
pub use loopback::LoopbackClient;
pub use mocks::{vnode, MockRing, RecordedCall, RecordingClient, StaticHandler};
