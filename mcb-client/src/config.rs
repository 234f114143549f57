//! # Configuration Strings
//!
//! Purpose: Parse the libmemcached-style option string (`--SERVER=... --POOL-MAX=...`)
//! into a typed `ClientConfig` shared by the pool and every pooled client.
//!
//! ## Design Principles
//! 1. **One Source of Truth**: The string is parsed once at pool construction.
//! 2. **Fail Fast**: Any unknown or malformed token rejects the whole string.
//! 3. **Readable Diagnostics**: Errors render as operator-facing text.

use std::time::Duration;

use thiserror::Error;

/// Option name that bounds the number of concurrent leases.
pub const POOL_MAX_PREFIX: &str = "--POOL-MAX=";

/// Default maximum pool size when the string does not carry one.
pub const DEFAULT_POOL_MAX: usize = 40;

/// Default number of clients created when the pool is built.
pub const DEFAULT_POOL_MIN: usize = 1;

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(4000);

/// Default socket read and write timeout, bounding one round trip.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors produced while parsing a configuration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unexpected token '{0}', options must start with '--'")]
    InvalidToken(String),
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("option '{0}' requires a value")]
    MissingValue(String),
    #[error("option '{0}' does not take a value")]
    UnexpectedValue(String),
    #[error("option '{option}' expects a number, got '{value}'")]
    InvalidNumber { option: String, value: String },
    #[error("invalid server address '{0}'")]
    InvalidServer(String),
    #[error("no servers were provided")]
    NoServers,
    #[error("POOL-MAX must be greater than zero")]
    EmptyPool,
    #[error("POOL-MIN ({min}) exceeds POOL-MAX ({max})")]
    PoolBounds { min: usize, max: usize },
}

/// One memcached server in the configured set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Parsed client and pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Servers in declaration order; keys are distributed across them.
    pub servers: Vec<ServerAddr>,
    /// Clients created eagerly when the pool is built.
    pub pool_min: usize,
    /// Maximum concurrent leases.
    pub pool_max: usize,
    /// TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// TCP read timeout; `None` blocks until the server answers.
    pub read_timeout: Option<Duration>,
    /// TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Prefix prepended to every key on the wire.
    pub namespace: String,
    /// Validate key length and charset before sending.
    pub verify_key: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: Vec::new(),
            pool_min: DEFAULT_POOL_MIN,
            pool_max: DEFAULT_POOL_MAX,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_IO_TIMEOUT),
            write_timeout: Some(DEFAULT_IO_TIMEOUT),
            namespace: String::new(),
            verify_key: false,
        }
    }
}

impl ClientConfig {
    /// Parses a whitespace-separated option string.
    pub fn parse(config: &str) -> Result<Self, ConfigError> {
        let mut parsed = ClientConfig::default();

        for token in config.split_whitespace() {
            let body = token
                .strip_prefix("--")
                .ok_or_else(|| ConfigError::InvalidToken(token.to_string()))?;
            let (name, value) = match body.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (body, None),
            };
            let name = name.to_ascii_uppercase();

            match name.as_str() {
                "SERVER" => {
                    let value = required(&name, value)?;
                    parsed.servers.push(parse_server(value)?);
                }
                "POOL-MIN" => parsed.pool_min = parse_number(&name, required(&name, value)?)?,
                "POOL-MAX" => parsed.pool_max = parse_number(&name, required(&name, value)?)?,
                "CONNECT-TIMEOUT" => {
                    parsed.connect_timeout = parse_timeout(&name, required(&name, value)?)?;
                }
                "RCV-TIMEOUT" => {
                    parsed.read_timeout = parse_timeout(&name, required(&name, value)?)?;
                }
                "SND-TIMEOUT" => {
                    parsed.write_timeout = parse_timeout(&name, required(&name, value)?)?;
                }
                "NAMESPACE" => parsed.namespace = required(&name, value)?.to_string(),
                "TCP-NODELAY" => flag(&name, value)?,
                "VERIFY-KEY" => {
                    flag(&name, value)?;
                    parsed.verify_key = true;
                }
                _ => return Err(ConfigError::UnknownOption(token.to_string())),
            }
        }

        if parsed.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        if parsed.pool_max == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if parsed.pool_min > parsed.pool_max {
            return Err(ConfigError::PoolBounds {
                min: parsed.pool_min,
                max: parsed.pool_max,
            });
        }

        Ok(parsed)
    }
}

/// Validates a configuration string, returning the diagnostic on failure.
pub fn check_configuration(config: &str) -> Result<(), String> {
    ClientConfig::parse(config).map(|_| ()).map_err(|err| err.to_string())
}

/// Reports whether the string already carries a `--POOL-MAX=` directive.
pub fn has_pool_max(config: &str) -> bool {
    config
        .to_ascii_uppercase()
        .contains(POOL_MAX_PREFIX)
}

fn required<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingValue(name.to_string())),
    }
}

fn flag(name: &str, value: Option<&str>) -> Result<(), ConfigError> {
    match value {
        None => Ok(()),
        Some(_) => Err(ConfigError::UnexpectedValue(name.to_string())),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        option: name.to_string(),
        value: value.to_string(),
    })
}

/// Milliseconds; zero disables the timeout.
fn parse_timeout(name: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let millis = parse_number::<u64>(name, value)?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

/// Parses `host[:port][/?weight]`, with `[v6]:port` for IPv6 literals.
///
/// The weight must be numeric but is otherwise ignored.
fn parse_server(value: &str) -> Result<ServerAddr, ConfigError> {
    let invalid = || ConfigError::InvalidServer(value.to_string());

    let addr = match value.split_once("/?") {
        Some((addr, weight)) => {
            weight.parse::<u32>().map_err(|_| invalid())?;
            addr
        }
        None => value,
    };

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            tail => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    if port == 0 {
        return Err(invalid());
    }

    Ok(ServerAddr {
        host: host.to_string(),
        port,
    })
}
