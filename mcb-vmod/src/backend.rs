//! # Pool Seam
//!
//! Purpose: Keep the command layer independent of the concrete cache client
//! so a live memcached pool and an in-memory double are interchangeable.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `CachePool` is the only thing commands know about.
//! 2. **Narrow Interface**: acquire with a timeout, release, destroy.
//! 3. **Uniform Errors**: Connections report `ClientError` whatever the backend.

use std::time::Duration;

use mcb_client::{ClientResult, McPool, PooledClient};

/// One leased connection able to run a single cache operation.
pub trait CacheConnection {
    /// Returns `Ok(None)` on a miss.
    fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: &[u8], expiration: i64, flags: u32) -> ClientResult<()>;

    fn increment(&mut self, key: &[u8], offset: u64) -> ClientResult<u64>;

    fn decrement(&mut self, key: &[u8], offset: u64) -> ClientResult<u64>;

    fn increment_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64>;

    fn decrement_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64>;

    /// Detail text of the last failed operation, if any.
    fn last_error_message(&self) -> Option<&str>;
}

/// Thread-safe pool handing out connections for a bounded time.
pub trait CachePool: Send + Sync {
    type Conn: CacheConnection;

    /// Waits at most `timeout`; `None` on timeout or any other pool failure.
    fn acquire(&self, timeout: Duration) -> Option<Self::Conn>;

    /// Hands a connection back. Called exactly once per successful acquire.
    fn release(&self, conn: Self::Conn);

    /// Closes every pooled connection. Called once, at unload.
    fn destroy(&self);
}

impl CacheConnection for PooledClient {
    fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8], expiration: i64, flags: u32) -> ClientResult<()> {
        (**self).set(key, value, expiration, flags)
    }

    fn increment(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        (**self).increment(key, offset)
    }

    fn decrement(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        (**self).decrement(key, offset)
    }

    fn increment_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64> {
        (**self).increment_with_initial(key, offset, initial, expiration)
    }

    fn decrement_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64> {
        (**self).decrement_with_initial(key, offset, initial, expiration)
    }

    fn last_error_message(&self) -> Option<&str> {
        (**self).last_error_message()
    }
}

impl CachePool for McPool {
    type Conn = PooledClient;

    fn acquire(&self, timeout: Duration) -> Option<PooledClient> {
        self.fetch(timeout).ok()
    }

    fn release(&self, conn: PooledClient) {
        McPool::release(self, conn);
    }

    fn destroy(&self) {
        McPool::destroy(self);
    }
}
