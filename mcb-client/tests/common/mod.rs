//! In-process memcached stand-ins speaking the ASCII protocol.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Store = Arc<Mutex<HashMap<Vec<u8>, (u32, Vec<u8>)>>>;

/// Key length memcached accepts before answering `CLIENT_ERROR`.
pub const SERVER_KEY_LIMIT: usize = 250;

pub struct FakeServer {
    addr: String,
    store: Store,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn start() -> Self {
        Self::with_key_limit(SERVER_KEY_LIMIT)
    }

    /// Starts a server rejecting keys longer than `key_limit` the way
    /// memcached does: `CLIENT_ERROR` on the command line, with any data
    /// block left unread and parsed as the next command.
    pub fn with_key_limit(key_limit: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let shared = store.clone();
        let counter = accepted.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                let store = shared.clone();
                thread::spawn(move || {
                    let _ = serve(stream, store, key_limit);
                });
            }
        });

        FakeServer {
            addr,
            store,
            accepted,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Configuration string pointing at this server.
    pub fn config(&self) -> String {
        format!("--SERVER={}", self.addr)
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_vec(), (0, value.to_vec()));
    }

    pub fn value(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.lock().unwrap().get(key).map(|(_, data)| data.clone())
    }

    pub fn flags(&self, key: &[u8]) -> Option<u32> {
        self.store.lock().unwrap().get(key).map(|(flags, _)| *flags)
    }

    /// Waits up to one second for `count` accepted connections.
    pub fn wait_for_connections(&self, count: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.accepted.load(Ordering::SeqCst) < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Accepts connections and never answers.
pub struct SilentServer {
    addr: String,
}

impl SilentServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                held.push(stream);
            }
        });
        SilentServer { addr }
    }

    pub fn config(&self) -> String {
        format!("--SERVER={}", self.addr)
    }
}

fn serve(stream: TcpStream, store: Store, key_limit: usize) -> std::io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let too_long = words.get(1).is_some_and(|key| key.len() > key_limit);
        let reply = match words.as_slice() {
            ["get" | "set" | "add" | "incr" | "decr", ..] if too_long => {
                b"CLIENT_ERROR bad command line format\r\n".to_vec()
            }
            ["get", key] => {
                let store = store.lock().unwrap();
                match store.get(key.as_bytes()) {
                    Some((flags, data)) => {
                        let mut out = format!("VALUE {key} {flags} {}\r\n", data.len()).into_bytes();
                        out.extend_from_slice(data);
                        out.extend_from_slice(b"\r\nEND\r\n");
                        out
                    }
                    None => b"END\r\n".to_vec(),
                }
            }
            [verb @ ("set" | "add"), key, flags, _exptime, len] => {
                let len: usize = len.parse().unwrap_or(0);
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data)?;
                data.truncate(len);
                let flags: u32 = flags.parse().unwrap_or(0);

                let mut store = store.lock().unwrap();
                if *verb == "add" && store.contains_key(key.as_bytes()) {
                    b"NOT_STORED\r\n".to_vec()
                } else {
                    store.insert(key.as_bytes().to_vec(), (flags, data));
                    b"STORED\r\n".to_vec()
                }
            }
            [verb @ ("incr" | "decr"), key, delta] => {
                let delta: u64 = delta.parse().unwrap_or(0);
                let mut store = store.lock().unwrap();
                match store.get_mut(key.as_bytes()) {
                    None => b"NOT_FOUND\r\n".to_vec(),
                    Some((_, data)) => match std::str::from_utf8(data).ok().and_then(|s| s.parse::<u64>().ok()) {
                        None => b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec(),
                        Some(current) => {
                            let next = if *verb == "incr" {
                                current.wrapping_add(delta)
                            } else {
                                current.saturating_sub(delta)
                            };
                            *data = next.to_string().into_bytes();
                            format!("{next}\r\n").into_bytes()
                        }
                    },
                }
            }
            _ => b"ERROR\r\n".to_vec(),
        };
        writer.write_all(&reply)?;
        writer.flush()?;
    }
}
