//! Configuration types for the replicated table.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default maximum frame size (16MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration for a table node.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Address this node serves its vnodes on (`ip:port`).
    pub host: String,

    /// Replication factor used when the ring does not override it.
    pub replicas: usize,

    /// Outbound RPC configuration.
    pub rpc: RpcConfig,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:5000".to_string(),
            replicas: 2,
            rpc: RpcConfig::default(),
        }
    }
}

impl TableConfig {
    /// Create a new configuration for the given host address.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Set the replication factor.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set RPC configuration.
    pub fn with_rpc_config(mut self, rpc: RpcConfig) -> Self {
        self.rpc = rpc;
        self
    }

    /// Set the RPC client timeout.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.rpc.timeout = timeout;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be at least 1".into()));
        }
        self.rpc.validate()
    }
}

/// RPC client configuration.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Bound on a whole request/response exchange.
    pub timeout: Duration,

    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,

    /// Largest frame accepted from a peer.
    pub max_message_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RpcConfig {
    /// Create a config with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("rpc timeout must be non-zero".into()));
        }
        if self.max_message_size == 0 {
            return Err(Error::Config("max message size must be non-zero".into()));
        }
        Ok(())
    }
}
