//! # Bridge Errors
//!
//! Fatal setup errors abort a configuration load. Command errors never leave
//! the command layer: they are logged and turned into sentinels at the
//! boundary.

use mcb_client::ClientError;
use thiserror::Error;

/// Result type for configuration entry points.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that must stop the configuration from loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The server list could not be turned into a pool.
    #[error("memcached servers() error: {diagnostic}")]
    InvalidServers { diagnostic: String },
    /// `servers()` ran twice for the same configuration.
    #[error("memcached servers() called twice, the pool is already configured")]
    AlreadyConfigured,
}

/// Outcome of one command before sentinel translation.
#[derive(Debug, Error)]
pub(crate) enum CommandError {
    /// `servers()` never ran.
    #[error("no memcached pool configured")]
    NoPool,
    /// No pooled connection freed up before the timeout.
    #[error("no pooled connection available")]
    Unavailable,
    /// A host value does not fit the wire type.
    #[error("invalid {0}")]
    InvalidArgument(&'static str),
    /// The read succeeded without a value, or the value could not be copied out.
    #[error("no value")]
    Miss,
    /// The client library reported a failure.
    #[error(transparent)]
    Client(#[from] ClientError),
}

pub(crate) type CommandResult<T> = Result<T, CommandError>;
