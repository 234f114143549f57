//! # memcached Bridge for Request Scripts
//!
//! Purpose: Let request-processing logic read and write a memcached cluster
//! through a shared connection pool, with every failure turned into a
//! caller-configured sentinel instead of an error.
//!
//! ## Design Principles
//! 1. **Explicit Context**: `Settings` is created per configuration load and
//!    passed by reference to every command.
//! 2. **Strategy Pattern**: Commands talk to `CachePool`, so the live pool and
//!    test doubles are interchangeable.
//! 3. **No Error Channel Outward**: Commands return values or sentinels; only
//!    configuration setup can fail, and that failure aborts the load.
//!
//! ## Usage
//!
//! ```no_run
//! use mcb_vmod::{commands, on_event, Event, Settings, Workspace};
//!
//! let mut slot: Option<Settings> = None;
//! on_event(&mut slot, Event::Load);
//!
//! let settings = slot.as_mut().unwrap();
//! settings.servers("--SERVER=127.0.0.1:11211").expect("pool");
//! settings.error_string("ERR");
//!
//! let mut ws = Workspace::new();
//! commands::set(settings, "greeting", "hello", 0, 0);
//! let value = commands::get(settings, &mut ws, "greeting");
//! assert_eq!(value.as_deref(), Some(&b"hello"[..]));
//!
//! on_event(&mut slot, Event::Discard);
//! ```

mod backend;
pub mod commands;
mod error;
mod lifecycle;
mod settings;
mod workspace;

pub use backend::{CacheConnection, CachePool};
pub use error::{BridgeError, BridgeResult};
pub use lifecycle::{on_event, Event};
pub use settings::{
    effective_config, ErrorString, Settings, DEFAULT_ERROR_INT, DEFAULT_POOL_TIMEOUT_MS,
    ERROR_STRING_CAPACITY,
};
pub use workspace::{Workspace, DEFAULT_WORKSPACE_BYTES};
