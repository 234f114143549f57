//! # Pooled Client Handle
//!
//! Purpose: Expose a compact, blocking API for issuing memcached commands
//! against a set of servers. One `McClient` is the unit leased from the pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `McClient` hides server selection and framing.
//! 2. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.
//! 3. **Lazy Connections**: Each server socket opens on first use and is
//!    re-established after an I/O or framing failure.
//! 4. **Last Error**: The most recent failure text stays readable after the
//!    call returns, for callers that log it separately.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ClientConfig, ServerAddr};
use crate::protocol::{
    encode_counter, encode_get, encode_storage, read_reply, validate_key, CounterVerb, Reply,
    StorageVerb,
};

/// Result type for client commands.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by client commands.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Reply framing did not follow the protocol.
    #[error("protocol error")]
    Protocol,
    /// `SERVER_ERROR` reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// `CLIENT_ERROR` reply, e.g. incrementing a non-numeric value.
    #[error("client error: {}", String::from_utf8_lossy(.message))]
    Client { message: Vec<u8> },
    /// Bare `ERROR` reply.
    #[error("unknown command")]
    UnknownCommand,
    /// Counter target does not exist.
    #[error("not found")]
    NotFound,
    /// Storage command was refused.
    #[error("not stored")]
    NotStored,
    /// Reply type did not match the command.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Key cannot be sent (empty, whitespace, or too long).
    #[error("invalid key")]
    BadKey,
    /// Server address did not resolve to any socket address.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

impl ClientError {
    /// Short classification of the failure, independent of its details.
    pub fn class(&self) -> &'static str {
        match self {
            ClientError::Io(_) => "SYSTEM ERROR",
            ClientError::Protocol | ClientError::UnexpectedResponse => "PROTOCOL ERROR",
            ClientError::Server { .. } => "SERVER ERROR",
            ClientError::Client { .. } => "CLIENT ERROR",
            ClientError::UnknownCommand => "UNKNOWN COMMAND",
            ClientError::NotFound => "NOT FOUND",
            ClientError::NotStored => "NOT STORED",
            ClientError::BadKey => "A BAD KEY WAS PROVIDED/CHARACTERS OUT OF RANGE",
            ClientError::InvalidAddress(_) => "HOSTNAME LOOKUP FAILURE",
        }
    }

    /// Human-readable detail when the failure carries one.
    fn detail(&self) -> Option<String> {
        match self {
            ClientError::Io(err) => Some(err.to_string()),
            ClientError::Server { message } | ClientError::Client { message } => {
                Some(String::from_utf8_lossy(message).into_owned())
            }
            ClientError::InvalidAddress(addr) => Some(format!("could not resolve {addr}")),
            _ => None,
        }
    }

    /// Whether the socket state is unknown after this error.
    fn breaks_connection(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Protocol)
    }
}

/// Blocking client over every configured server.
///
/// Not `Sync`: a client is used by one caller at a time, which the pool
/// guarantees by leasing it exclusively.
pub struct McClient {
    config: Arc<ClientConfig>,
    connections: Vec<Option<Connection>>,
    key_buf: Vec<u8>,
    last_error: Option<String>,
}

impl McClient {
    /// Creates a client without opening any socket.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        let connections = config.servers.iter().map(|_| None).collect();
        McClient {
            config,
            connections,
            key_buf: Vec::with_capacity(64),
            last_error: None,
        }
    }

    /// Opens every server connection that is not yet established.
    ///
    /// Each server is tried even when an earlier one fails; failures are
    /// logged and left to reconnect on first use. Returns how many servers
    /// could not be reached.
    pub fn connect_all(&mut self) -> usize {
        let mut failed = 0;
        for (server, slot) in self.config.servers.iter().zip(self.connections.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            match Connection::connect(server, &self.config) {
                Ok(conn) => *slot = Some(conn),
                Err(err) => {
                    failed += 1;
                    warn!(server = %server.authority(), error = %err, "memcached connect failed, connecting lazily");
                }
            }
        }
        failed
    }

    /// Returns the shared configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Text of the most recent failure, if it carried one.
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        let result = self.exec(key, Framing::Line, encode_get).and_then(|reply| match reply {
            Reply::Value { data, .. } => Ok(Some(data)),
            Reply::End => Ok(None),
            other => Err(reply_error(other)),
        });
        self.track(result)
    }

    /// Stores a value. `expiration` is in seconds, 0 means never.
    pub fn set(&mut self, key: &[u8], value: &[u8], expiration: i64, flags: u32) -> ClientResult<()> {
        let result = self
            .exec(key, Framing::DataBlock, |key, out| {
                encode_storage(StorageVerb::Set, key, flags, expiration, value, out)
            })
            .and_then(expect_stored);
        self.track(result)
    }

    /// Increments a counter, returning the new value.
    pub fn increment(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        let result = self.counter(CounterVerb::Incr, key, offset);
        self.track(result)
    }

    /// Decrements a counter, returning the new value. The server clamps at zero.
    pub fn decrement(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        let result = self.counter(CounterVerb::Decr, key, offset);
        self.track(result)
    }

    /// Increments a counter, seeding it with `initial` when it does not exist.
    pub fn increment_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64> {
        let result = self.counter_with_initial(CounterVerb::Incr, key, offset, initial, expiration);
        self.track(result)
    }

    /// Decrements a counter, seeding it with `initial` when it does not exist.
    pub fn decrement_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64> {
        let result = self.counter_with_initial(CounterVerb::Decr, key, offset, initial, expiration);
        self.track(result)
    }

    fn counter(&mut self, verb: CounterVerb, key: &[u8], offset: u64) -> ClientResult<u64> {
        match self.exec(key, Framing::Line, |key, out| encode_counter(verb, key, offset, out))? {
            Reply::Number(value) => Ok(value),
            other => Err(reply_error(other)),
        }
    }

    fn counter_with_initial(
        &mut self,
        verb: CounterVerb,
        key: &[u8],
        offset: u64,
        initial: u64,
        expiration: i64,
    ) -> ClientResult<u64> {
        match self.counter(verb, key, offset) {
            Err(ClientError::NotFound) => {}
            other => return other,
        }

        let seed = initial.to_string();
        let reply = self.exec(key, Framing::DataBlock, |key, out| {
            encode_storage(StorageVerb::Add, key, 0, expiration, seed.as_bytes(), out)
        })?;
        match reply {
            Reply::Stored => Ok(initial),
            // Another client created the counter between our two commands.
            Reply::NotStored => self.counter(verb, key, offset),
            other => Err(reply_error(other)),
        }
    }

    fn track<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        self.last_error = match &result {
            Ok(_) => None,
            Err(err) => err.detail(),
        };
        result
    }

    fn exec<F>(&mut self, key: &[u8], framing: Framing, encode: F) -> ClientResult<Reply>
    where
        F: FnOnce(&[u8], &mut Vec<u8>),
    {
        let idx = self.server_for(key);

        let mut wire_key = std::mem::take(&mut self.key_buf);
        wire_key.clear();
        wire_key.extend_from_slice(self.config.namespace.as_bytes());
        wire_key.extend_from_slice(key);

        let result = validate_key(&wire_key, self.config.verify_key)
            .and_then(|()| self.exec_on(idx, &wire_key, framing, encode));
        self.key_buf = wire_key;
        result
    }

    fn exec_on<F>(
        &mut self,
        idx: usize,
        wire_key: &[u8],
        framing: Framing,
        encode: F,
    ) -> ClientResult<Reply>
    where
        F: FnOnce(&[u8], &mut Vec<u8>),
    {
        let mut conn = match self.connections[idx].take() {
            Some(conn) => conn,
            None => Connection::connect(&self.config.servers[idx], &self.config)?,
        };

        conn.write_buf.clear();
        encode(wire_key, &mut conn.write_buf);
        let result = conn.round_trip();

        let keep = match &result {
            // Unknown socket state: drop it so the next call reconnects.
            Err(err) => !err.breaks_connection(),
            // The server may have read the data block as a command of its
            // own, leaving an extra reply queued behind this one.
            Ok(Reply::ClientError(_)) => framing == Framing::Line,
            Ok(_) => true,
        };
        if keep {
            self.connections[idx] = Some(conn);
        }
        result
    }

    fn server_for(&self, key: &[u8]) -> usize {
        match self.connections.len() {
            0 | 1 => 0,
            count => (one_at_a_time(key) as usize) % count,
        }
    }
}

/// Shape of the request body following the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// The command line is the whole request.
    Line,
    /// A data block follows the command line.
    DataBlock,
}

fn expect_stored(reply: Reply) -> ClientResult<()> {
    match reply {
        Reply::Stored => Ok(()),
        other => Err(reply_error(other)),
    }
}

fn reply_error(reply: Reply) -> ClientError {
    match reply {
        Reply::ServerError(message) => ClientError::Server { message },
        Reply::ClientError(message) => ClientError::Client { message },
        Reply::Error => ClientError::UnknownCommand,
        Reply::NotFound => ClientError::NotFound,
        Reply::NotStored => ClientError::NotStored,
        _ => ClientError::UnexpectedResponse,
    }
}

/// Jenkins one-at-a-time hash, the default key distribution hash.
fn one_at_a_time(key: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in key {
        hash = hash.wrapping_add(u32::from(b));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Single TCP connection with reusable buffers.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(server: &ServerAddr, config: &ClientConfig) -> ClientResult<Self> {
        let stream = connect_stream(server, config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        debug!(server = %server.authority(), "memcached connection established");

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn round_trip(&mut self) -> ClientResult<Reply> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_reply(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(server: &ServerAddr, config: &ClientConfig) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (server.host.as_str(), server.port)
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(server.authority()))?
        .collect();
    if addrs.is_empty() {
        return Err(ClientError::InvalidAddress(server.authority()));
    }

    let mut last_err = None;
    for addr in &addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) => Err(ClientError::Io(err)),
        None => Err(ClientError::InvalidAddress(server.authority())),
    }
}
