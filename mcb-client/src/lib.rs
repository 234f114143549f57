//! # memcached Client Library
//!
//! Purpose: Provide a lightweight, synchronous memcached client with a
//! bounded connection pool so callers skip per-call TCP handshakes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse clients (and their sockets) across calls.
//! 2. **Bounded Waiting**: Leasing waits at most a caller-provided timeout.
//! 3. **Minimal Allocation**: Reuse buffers for command framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse the ASCII protocol explicitly.

mod client;
mod config;
mod pool;
mod protocol;

pub use client::{ClientError, ClientResult, McClient};
pub use config::{
    check_configuration, has_pool_max, ClientConfig, ConfigError, ServerAddr, DEFAULT_IO_TIMEOUT,
    DEFAULT_POOL_MAX, POOL_MAX_PREFIX,
};
pub use pool::{McPool, PoolError, PoolStats, PooledClient};
pub use protocol::MAX_KEY_LEN;
