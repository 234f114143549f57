//! # Client Pool
//!
//! Purpose: Share a bounded set of `McClient` handles between worker threads
//! so each cache call skips the TCP handshake.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable clients.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle clients.
//! 3. **Bounded Waiting**: A caller waits on a condition variable for at
//!    most its timeout when every client is leased, never indefinitely.
//! 4. **RAII Leases**: `PooledClient` returns itself to the pool on drop, so
//!    every exit path releases the lease.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::client::McClient;
use crate::config::{ClientConfig, ConfigError};

/// Errors returned by `McPool::fetch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every client stayed leased until the deadline.
    #[error("timed out waiting for a pooled connection")]
    Timeout,
    /// The pool was destroyed.
    #[error("connection pool is closed")]
    Closed,
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Clients waiting in the pool.
    pub idle: usize,
    /// Clients currently leased.
    pub in_use: usize,
    /// Upper bound on live clients.
    pub max: usize,
}

struct PoolState {
    idle: VecDeque<McClient>,
    /// Live clients, idle and leased.
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: Arc<ClientConfig>,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Bounded pool of memcached clients.
#[derive(Clone)]
pub struct McPool {
    inner: Arc<PoolInner>,
}

impl McPool {
    /// Parses a configuration string and builds the pool.
    pub fn from_config_str(config: &str) -> Result<Self, ConfigError> {
        ClientConfig::parse(config).map(Self::new)
    }

    /// Builds the pool, connecting `pool_min` clients up front.
    ///
    /// Warm-up tries every server for every client. Failures are logged and
    /// tolerated: those sockets open on first use.
    pub fn new(config: ClientConfig) -> Self {
        let config = Arc::new(config);
        let mut idle = VecDeque::with_capacity(config.pool_max);
        let mut unreachable = 0;
        for _ in 0..config.pool_min {
            let mut client = McClient::new(config.clone());
            unreachable += client.connect_all();
            idle.push_back(client);
        }
        debug!(
            servers = config.servers.len(),
            pool_min = config.pool_min,
            pool_max = config.pool_max,
            unreachable,
            "memcached pool created"
        );

        let total = idle.len();
        McPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState {
                    idle,
                    total,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Returns the parsed configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Leases a client, waiting at most `timeout` for one to free up.
    ///
    /// A zero timeout never blocks.
    pub fn fetch(&self, timeout: Duration) -> Result<PooledClient, PoolError> {
        // An unrepresentable deadline means "wait as long as it takes".
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(client) = state.idle.pop_front() {
                return Ok(PooledClient::new(self.inner.clone(), client));
            }
            if state.total < self.inner.config.pool_max {
                state.total += 1;
                drop(state);
                let client = McClient::new(self.inner.config.clone());
                return Ok(PooledClient::new(self.inner.clone(), client));
            }

            match deadline {
                Some(deadline) => {
                    if self.inner.available.wait_until(&mut state, deadline).timed_out() {
                        if state.closed {
                            return Err(PoolError::Closed);
                        }
                        return match state.idle.pop_front() {
                            Some(client) => Ok(PooledClient::new(self.inner.clone(), client)),
                            None => Err(PoolError::Timeout),
                        };
                    }
                }
                None => self.inner.available.wait(&mut state),
            }
        }
    }

    /// Returns a leased client to the pool.
    ///
    /// Equivalent to dropping the lease; provided for call sites that want
    /// the release to be explicit.
    pub fn release(&self, client: PooledClient) {
        drop(client);
    }

    /// Closes every idle client and rejects further leases.
    ///
    /// Clients still leased are closed when they come back. Idempotent.
    pub fn destroy(&self) {
        let drained: Vec<McClient> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<McClient> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.inner.available.notify_all();
        debug!(closed = drained.len(), "memcached pool destroyed");
        // Sockets close as the clients drop, outside the lock.
        drop(drained);
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
            max: self.inner.config.pool_max,
        }
    }
}

impl PoolInner {
    fn return_client(&self, client: McClient) {
        let mut state = self.state.lock();
        if state.closed {
            state.total = state.total.saturating_sub(1);
            drop(state);
            drop(client);
            return;
        }
        state.idle.push_back(client);
        drop(state);
        self.available.notify_one();
    }
}

/// RAII lease returning the client to the pool on drop.
pub struct PooledClient {
    pool: Arc<PoolInner>,
    client: Option<McClient>,
}

impl PooledClient {
    fn new(pool: Arc<PoolInner>, client: McClient) -> Self {
        PooledClient {
            pool,
            client: Some(client),
        }
    }
}

impl Deref for PooledClient {
    type Target = McClient;

    fn deref(&self) -> &McClient {
        // Only `Drop` takes the client out.
        self.client.as_ref().expect("lease holds a client until dropped")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut McClient {
        self.client.as_mut().expect("lease holds a client until dropped")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.return_client(client);
        }
    }
}
