//! # Command Layer
//!
//! Purpose: Run one cache operation per call on behalf of request logic that
//! has no error channel, translating every failure into a sentinel.
//!
//! ## Design Principles
//! 1. **Acquire, Invoke, Release, Translate**: Every command leases one
//!    connection, issues one operation, gives the connection back, then
//!    decides what the caller sees.
//! 2. **Guaranteed Release**: The lease is a guard released on drop, so early
//!    returns cannot leak a connection.
//! 3. **Typed Inside, Sentinels Outside**: Internals return `CommandResult`;
//!    only the public functions convert errors to `error_int`/`error_string`.
//! 4. **Quiet Exhaustion**: A missing pool or an acquisition timeout is
//!    expected under load and is not logged.

use bytes::Bytes;
use tracing::error;

use crate::backend::{CacheConnection, CachePool};
use crate::error::{CommandError, CommandResult};
use crate::settings::Settings;
use crate::workspace::Workspace;

/// Stores `value` under `key`. Failures are logged, never reported.
///
/// `expiration` is in seconds (0 = never); `flags` is stored opaquely.
pub fn set<P: CachePool>(
    settings: &Settings<P>,
    key: &str,
    value: &str,
    expiration: i64,
    flags: i64,
) {
    let flags = match u32::try_from(flags) {
        Ok(flags) => flags,
        Err(_) => {
            log_failure("set", key, &CommandError::InvalidArgument("flags"), None);
            return;
        }
    };
    // Best-effort population: the outcome is already logged.
    let _ = run(settings, "set", key, |conn| {
        conn.set(key.as_bytes(), value.as_bytes(), expiration, flags)
    });
}

/// Fetches `key`, copying the value into the request workspace.
///
/// Misses, empty values and failures all return the configured error string
/// (`None` while it is unset).
pub fn get<P: CachePool>(settings: &Settings<P>, ws: &mut Workspace, key: &str) -> Option<Bytes> {
    match fetch(settings, ws, key) {
        Ok(value) => Some(value),
        Err(_) => settings.error_string_value().map(Bytes::copy_from_slice),
    }
}

/// Adds `offset` to the counter at `key`.
pub fn incr<P: CachePool>(settings: &Settings<P>, key: &str, offset: i64) -> i64 {
    let result = offset_arg(offset).and_then(|offset| {
        run(settings, "increment", key, |conn| conn.increment(key.as_bytes(), offset))
    });
    counter_or_sentinel(settings, "increment", key, result)
}

/// Subtracts `offset` from the counter at `key`. The server clamps at zero.
pub fn decr<P: CachePool>(settings: &Settings<P>, key: &str, offset: i64) -> i64 {
    let result = offset_arg(offset).and_then(|offset| {
        run(settings, "decrement", key, |conn| conn.decrement(key.as_bytes(), offset))
    });
    counter_or_sentinel(settings, "decrement", key, result)
}

/// Like `incr`, but a missing counter is created as `initial` with `expiration`.
pub fn incr_set<P: CachePool>(
    settings: &Settings<P>,
    key: &str,
    offset: i64,
    initial: i64,
    expiration: i64,
) -> i64 {
    let result = counter_args(offset, initial).and_then(|(offset, initial)| {
        run(settings, "increment_with_initial", key, |conn| {
            conn.increment_with_initial(key.as_bytes(), offset, initial, expiration)
        })
    });
    counter_or_sentinel(settings, "increment_with_initial", key, result)
}

/// Like `decr`, but a missing counter is created as `initial` with `expiration`.
pub fn decr_set<P: CachePool>(
    settings: &Settings<P>,
    key: &str,
    offset: i64,
    initial: i64,
    expiration: i64,
) -> i64 {
    let result = counter_args(offset, initial).and_then(|(offset, initial)| {
        run(settings, "decrement_with_initial", key, |conn| {
            conn.decrement_with_initial(key.as_bytes(), offset, initial, expiration)
        })
    });
    counter_or_sentinel(settings, "decrement_with_initial", key, result)
}

fn fetch<P: CachePool>(
    settings: &Settings<P>,
    ws: &mut Workspace,
    key: &str,
) -> CommandResult<Bytes> {
    let value = run(settings, "get", key, |conn| conn.get(key.as_bytes()))?;
    // A stored empty string reads the same as a miss.
    let value = value.filter(|data| !data.is_empty()).ok_or(CommandError::Miss)?;

    match ws.copy(&value) {
        Some(copied) => Ok(copied),
        None => {
            log_failure("get", key, &CommandError::Miss, Some("workspace overflow"));
            Err(CommandError::Miss)
        }
    }
}

fn counter_or_sentinel<P: CachePool>(
    settings: &Settings<P>,
    command: &'static str,
    key: &str,
    result: CommandResult<u64>,
) -> i64 {
    match result {
        // Counters are unsigned on the wire; the host integer wraps like a C cast.
        Ok(value) => value as i64,
        Err(err) => {
            if matches!(err, CommandError::InvalidArgument(_)) {
                log_failure(command, key, &err, None);
            }
            settings.error_int_value()
        }
    }
}

fn offset_arg(offset: i64) -> CommandResult<u64> {
    u64::try_from(offset).map_err(|_| CommandError::InvalidArgument("offset"))
}

fn counter_args(offset: i64, initial: i64) -> CommandResult<(u64, u64)> {
    let offset = offset_arg(offset)?;
    let initial = u64::try_from(initial).map_err(|_| CommandError::InvalidArgument("initial"))?;
    Ok((offset, initial))
}

/// Leases a connection, runs `op`, releases, and logs client failures.
fn run<P, T, F>(settings: &Settings<P>, command: &'static str, key: &str, op: F) -> CommandResult<T>
where
    P: CachePool,
    F: FnOnce(&mut P::Conn) -> mcb_client::ClientResult<T>,
{
    let pool = settings.pool().ok_or(CommandError::NoPool)?;
    let mut lease = Lease::acquire(pool, settings)?;

    match op(lease.conn_mut()) {
        Ok(value) => Ok(value),
        Err(err) => {
            let detail = <P::Conn as CacheConnection>::last_error_message(lease.conn_mut())
                .map(str::to_owned);
            drop(lease);
            let err = CommandError::Client(err);
            log_failure(command, key, &err, detail.as_deref());
            Err(err)
        }
    }
}

fn log_failure(command: &'static str, key: &str, err: &CommandError, detail: Option<&str>) {
    let class = match err {
        CommandError::Client(inner) => inner.class().to_string(),
        other => other.to_string(),
    };
    error!(target: "mcb::command", command, key, "memcached {}() error: {}", command, class);
    if let Some(detail) = detail {
        error!(target: "mcb::command", command, key, "{}", detail);
    }
}

/// One leased connection, released back to its pool on drop.
struct Lease<'a, P: CachePool> {
    pool: &'a P,
    conn: Option<P::Conn>,
}

impl<'a, P: CachePool> Lease<'a, P> {
    fn acquire(pool: &'a P, settings: &Settings<P>) -> CommandResult<Self> {
        let conn = pool
            .acquire(settings.pool_timeout())
            .ok_or(CommandError::Unavailable)?;
        Ok(Lease {
            pool,
            conn: Some(conn),
        })
    }

    fn conn_mut(&mut self) -> &mut P::Conn {
        // Only `Drop` takes the connection out.
        self.conn.as_mut().expect("lease holds a connection until dropped")
    }
}

impl<P: CachePool> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
