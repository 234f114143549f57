//! # Settings Store
//!
//! Purpose: Hold the per-configuration state every command reads: the pool,
//! the acquisition timeout, and the two failure sentinels.
//!
//! ## Design Principles
//! 1. **Explicit Context**: One `Settings` per loaded configuration, passed by
//!    reference into every command; no process-wide state.
//! 2. **Configure Then Serve**: Setters take `&mut self` and run during the
//!    single-threaded load phase; commands only need `&self`.
//! 3. **Owned Sentinels**: The error string is copied into a fixed buffer
//!    owned by the store, never borrowed from the caller.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use mcb_client::{has_pool_max, McPool, DEFAULT_POOL_MAX, POOL_MAX_PREFIX};
use tracing::{debug, error};

use crate::backend::CachePool;
use crate::error::{BridgeError, BridgeResult};

/// Default wait for a pooled connection.
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 3000;

/// Default integer sentinel.
pub const DEFAULT_ERROR_INT: i64 = -1;

/// Size of the error string buffer, terminator included.
pub const ERROR_STRING_CAPACITY: usize = 128;

/// Fixed-capacity, NUL-terminated copy of the configured error string.
#[derive(Clone)]
pub struct ErrorString {
    buf: [u8; ERROR_STRING_CAPACITY],
    len: usize,
    configured: bool,
}

impl ErrorString {
    /// An unconfigured sentinel: failing reads return nothing.
    pub const fn unset() -> Self {
        ErrorString {
            buf: [0u8; ERROR_STRING_CAPACITY],
            len: 0,
            configured: false,
        }
    }

    /// Copies `value`, truncating to `ERROR_STRING_CAPACITY - 1` bytes.
    pub fn assign(&mut self, value: &[u8]) {
        // Stop at an embedded NUL the way a C string would.
        let value = match value.iter().position(|&b| b == 0) {
            Some(end) => &value[..end],
            None => value,
        };
        let len = value.len().min(ERROR_STRING_CAPACITY - 1);
        self.buf[..len].copy_from_slice(&value[..len]);
        self.buf[len] = 0;
        self.len = len;
        self.configured = true;
    }

    pub fn clear(&mut self) {
        self.buf[0] = 0;
        self.len = 0;
        self.configured = false;
    }

    /// Configured bytes without the terminator.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.configured.then(|| &self.buf[..self.len])
    }

    /// Configured bytes including the terminator.
    pub fn as_bytes_with_nul(&self) -> Option<&[u8]> {
        self.configured.then(|| &self.buf[..=self.len])
    }
}

impl Default for ErrorString {
    fn default() -> Self {
        ErrorString::unset()
    }
}

impl fmt::Debug for ErrorString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            Some(bytes) => write!(f, "ErrorString({:?})", String::from_utf8_lossy(bytes)),
            None => write!(f, "ErrorString(unset)"),
        }
    }
}

/// Per-configuration state shared by every command.
pub struct Settings<P: CachePool = McPool> {
    pool: Option<P>,
    pool_timeout: Duration,
    error_int: i64,
    error_string: ErrorString,
}

impl<P: CachePool> Settings<P> {
    /// Creates a store with defaults and no pool.
    pub fn new() -> Self {
        Settings {
            pool: None,
            pool_timeout: Duration::from_millis(DEFAULT_POOL_TIMEOUT_MS),
            error_int: DEFAULT_ERROR_INT,
            error_string: ErrorString::unset(),
        }
    }

    /// Installs an already built pool.
    ///
    /// # Errors
    /// Returns `BridgeError::AlreadyConfigured` if a pool is present.
    pub fn install_pool(&mut self, pool: P) -> BridgeResult<()> {
        if self.pool.is_some() {
            error!(target: "mcb::config", "memcached servers() called twice");
            return Err(BridgeError::AlreadyConfigured);
        }
        self.pool = Some(pool);
        Ok(())
    }

    /// Sets the string returned by failing reads.
    pub fn error_string(&mut self, value: &str) {
        self.error_string.assign(value.as_bytes());
    }

    /// Makes failing reads return nothing again.
    pub fn clear_error_string(&mut self) {
        self.error_string.clear();
    }

    /// Sets the integer returned by failing counter commands.
    pub fn error_int(&mut self, value: i64) {
        self.error_int = value;
    }

    /// Sets the pool wait in milliseconds. Zero never waits; negatives clamp to zero.
    pub fn pool_timeout_msec(&mut self, timeout: i64) {
        let millis = u64::try_from(timeout).unwrap_or(0);
        self.pool_timeout = Duration::from_millis(millis);
    }

    pub fn pool(&self) -> Option<&P> {
        self.pool.as_ref()
    }

    pub fn pool_timeout(&self) -> Duration {
        self.pool_timeout
    }

    pub fn error_int_value(&self) -> i64 {
        self.error_int
    }

    pub fn error_string_value(&self) -> Option<&[u8]> {
        self.error_string.as_bytes()
    }

    pub fn error_string_buffer(&self) -> &ErrorString {
        &self.error_string
    }
}

impl Settings<McPool> {
    /// Builds the memcached pool from a server-list configuration string.
    ///
    /// A `--POOL-MAX=` directive is appended when the string has none.
    ///
    /// # Errors
    /// `InvalidServers` with the parser's diagnostic, or `AlreadyConfigured`
    /// on a second call. Either must abort the configuration load.
    pub fn servers(&mut self, config: &str) -> BridgeResult<()> {
        if self.pool.is_some() {
            error!(target: "mcb::config", "memcached servers() called twice");
            return Err(BridgeError::AlreadyConfigured);
        }

        let effective = effective_config(config);
        debug!(target: "mcb::config", "memcached pool config '{}'", effective);

        match McPool::from_config_str(&effective) {
            Ok(pool) => self.install_pool(pool),
            Err(err) => {
                let diagnostic = err.to_string();
                error!(target: "mcb::config", "memcached servers() error");
                error!(target: "mcb::config", "{}", diagnostic);
                Err(BridgeError::InvalidServers { diagnostic })
            }
        }
    }
}

impl<P: CachePool> Default for Settings<P> {
    fn default() -> Self {
        Settings::new()
    }
}

impl<P: CachePool> Drop for Settings<P> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
    }
}

/// Returns the string handed to the pool constructor.
pub fn effective_config(config: &str) -> Cow<'_, str> {
    if has_pool_max(config) {
        Cow::Borrowed(config)
    } else {
        Cow::Owned(format!("{config} {POOL_MAX_PREFIX}{DEFAULT_POOL_MAX}"))
    }
}
