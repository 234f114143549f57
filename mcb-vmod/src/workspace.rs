//! # Request Workspace
//!
//! Scratch storage whose lifetime matches one request. `get` copies the
//! fetched value here before the client buffer is dropped, and hands back a
//! frozen `Bytes` view the request can keep as long as it needs.

use bytes::{Bytes, BytesMut};

/// Default scratch budget per request.
pub const DEFAULT_WORKSPACE_BYTES: usize = 64 * 1024;

/// Bounded per-request copy arena.
#[derive(Debug)]
pub struct Workspace {
    arena: BytesMut,
    limit: usize,
    used: usize,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_WORKSPACE_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Workspace {
            arena: BytesMut::with_capacity(limit),
            limit,
            used: 0,
        }
    }

    /// Copies `data` into the arena.
    ///
    /// Returns `None` when the copy would exceed the request budget.
    pub fn copy(&mut self, data: &[u8]) -> Option<Bytes> {
        if data.len() > self.remaining() {
            return None;
        }
        self.arena.extend_from_slice(data);
        self.used += data.len();
        Some(self.arena.split().freeze())
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    /// Starts a new request with the full budget.
    pub fn reset(&mut self) {
        self.arena = BytesMut::with_capacity(self.limit);
        self.used = 0;
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new()
    }
}
