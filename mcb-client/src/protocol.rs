//! # memcached ASCII Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies for the
//! memcached text protocol, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed line by line with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Data blocks are length-prefixed and treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use crate::client::{ClientError, ClientResult};

/// Longest key the server accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Server reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `VALUE <key> <flags> <bytes>` block followed by `END`.
    Value { flags: u32, data: Vec<u8> },
    /// Bare `END`: the key is missing.
    End,
    Stored,
    NotStored,
    Exists,
    NotFound,
    /// New counter value after `incr`/`decr`.
    Number(u64),
    /// Generic `ERROR` (unknown command).
    Error,
    /// `CLIENT_ERROR <message>`.
    ClientError(Vec<u8>),
    /// `SERVER_ERROR <message>`.
    ServerError(Vec<u8>),
}

/// Storage verbs sharing the `<verb> <key> <flags> <exptime> <bytes>` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    Set,
    Add,
}

impl StorageVerb {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            StorageVerb::Set => b"set",
            StorageVerb::Add => b"add",
        }
    }
}

/// Counter verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterVerb {
    Incr,
    Decr,
}

impl CounterVerb {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            CounterVerb::Incr => b"incr",
            CounterVerb::Decr => b"decr",
        }
    }
}

/// Checks that a wire key (namespace included) can be framed.
///
/// Empty keys, keys over `MAX_KEY_LEN`, and whitespace or control bytes are
/// always rejected: the server would answer them with `CLIENT_ERROR` without
/// consuming a following data block. `strict` also rejects non-ASCII bytes.
pub fn validate_key(key: &[u8], strict: bool) -> ClientResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(ClientError::BadKey);
    }
    if key.iter().any(|&b| b <= b' ' || b == 0x7f) {
        return Err(ClientError::BadKey);
    }
    if strict && !key.is_ascii() {
        return Err(ClientError::BadKey);
    }
    Ok(())
}

/// Encodes `get <key>\r\n`.
pub fn encode_get(key: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"get ");
    out.extend_from_slice(key);
    out.extend_from_slice(b"\r\n");
}

/// Encodes a storage command and its data block.
pub fn encode_storage(
    verb: StorageVerb,
    key: &[u8],
    flags: u32,
    exptime: i64,
    data: &[u8],
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    out.push(b' ');
    push_u64(out, u64::from(flags));
    out.push(b' ');
    push_i64(out, exptime);
    out.push(b' ');
    push_u64(out, data.len() as u64);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Encodes `incr|decr <key> <delta>\r\n`.
pub fn encode_counter(verb: CounterVerb, key: &[u8], delta: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(verb.as_bytes());
    out.push(b' ');
    out.extend_from_slice(key);
    out.push(b' ');
    push_u64(out, delta);
    out.extend_from_slice(b"\r\n");
}

/// Reads one reply from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Reply> {
    read_line(reader, line_buf)?;

    let line = line_buf.as_slice();
    match line {
        b"END" => return Ok(Reply::End),
        b"STORED" => return Ok(Reply::Stored),
        b"NOT_STORED" => return Ok(Reply::NotStored),
        b"EXISTS" => return Ok(Reply::Exists),
        b"NOT_FOUND" => return Ok(Reply::NotFound),
        b"ERROR" => return Ok(Reply::Error),
        _ => {}
    }

    if let Some(message) = line.strip_prefix(b"CLIENT_ERROR") {
        return Ok(Reply::ClientError(trim_message(message)));
    }
    if let Some(message) = line.strip_prefix(b"SERVER_ERROR") {
        return Ok(Reply::ServerError(trim_message(message)));
    }
    if let Some(header) = line.strip_prefix(b"VALUE ") {
        let (flags, len) = parse_value_header(header)?;
        return read_value_block(reader, flags, len, line_buf);
    }
    if line.first().is_some_and(u8::is_ascii_digit) {
        return Ok(Reply::Number(parse_u64(line)?));
    }

    Err(ClientError::Protocol)
}

/// Parses `<key> <flags> <bytes> [<cas>]`.
fn parse_value_header(header: &[u8]) -> ClientResult<(u32, usize)> {
    let mut fields = header.split(|&b| b == b' ').filter(|field| !field.is_empty());
    let _key = fields.next().ok_or(ClientError::Protocol)?;
    let flags = fields.next().ok_or(ClientError::Protocol)?;
    let len = fields.next().ok_or(ClientError::Protocol)?;

    let flags = u32::try_from(parse_u64(flags)?).map_err(|_| ClientError::Protocol)?;
    let len = usize::try_from(parse_u64(len)?).map_err(|_| ClientError::Protocol)?;
    Ok((flags, len))
}

fn read_value_block<R: BufRead>(
    reader: &mut R,
    flags: u32,
    len: usize,
    line_buf: &mut Vec<u8>,
) -> ClientResult<Reply> {
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }

    // Single-key gets are always terminated by END.
    read_line(reader, line_buf)?;
    if line_buf.as_slice() != b"END" {
        return Err(ClientError::Protocol);
    }

    Ok(Reply::Value { flags, data })
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Protocol);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn trim_message(message: &[u8]) -> Vec<u8> {
    message.trim_ascii().to_vec()
}

fn parse_u64(data: &[u8]) -> ClientResult<u64> {
    // Counter replies may carry trailing spaces on some servers.
    let data = data.trim_ascii_end();
    if data.is_empty() {
        return Err(ClientError::Protocol);
    }

    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or(ClientError::Protocol)?;
    }
    Ok(value)
}

fn push_i64(out: &mut Vec<u8>, value: i64) {
    if value < 0 {
        out.push(b'-');
    }
    push_u64(out, value.unsigned_abs());
}

fn push_u64(out: &mut Vec<u8>, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
