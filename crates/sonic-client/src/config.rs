//! Client configuration.

use std::time::Duration;

use crate::pool::PoolConfig;

/// Default service address.
pub const DEFAULT_ADDRESS: &str = "ws://127.0.0.1:9111/v1/query";

/// Default maximum inbound message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service address, passed to the transport unchanged.
    pub address: String,

    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,

    /// Log every inbound and outbound frame at `debug` instead of `trace`.
    pub debug: bool,
}

impl ClientConfig {
    /// Create a new client configuration with the specified address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            pool: PoolConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            debug: false,
        }
    }

    /// Create a configuration for a service on localhost.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }

    /// Set the pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the maximum pool size.
    pub fn with_max_pool_size(mut self, max: usize) -> Self {
        self.pool = self.pool.with_max_connections(max);
        self
    }

    /// Set the minimum pool size.
    pub fn with_min_pool_size(mut self, min: usize) -> Self {
        self.pool = self.pool.with_min_connections(min);
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool = self.pool.with_acquire_timeout(timeout);
        self
    }

    /// Set the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable frame-level diagnostics.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}
