//! Minimal memcached over loopback for end-to-end command tests.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

type Store = Arc<Mutex<HashMap<String, (u32, Vec<u8>)>>>;

pub struct FakeServer {
    addr: String,
    store: Store,
}

impl FakeServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let store: Store = Arc::default();

        let shared = store.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let store = shared.clone();
                thread::spawn(move || {
                    let _ = handle(stream, store);
                });
            }
        });

        FakeServer { addr, store }
    }

    pub fn config(&self) -> String {
        format!("--SERVER={}", self.addr)
    }

    pub fn insert(&self, key: &str, value: &str) {
        let entry = (0, value.as_bytes().to_vec());
        self.store.lock().unwrap().insert(key.to_string(), entry);
    }

    pub fn flags(&self, key: &str) -> Option<u32> {
        self.store.lock().unwrap().get(key).map(|entry| entry.0)
    }
}

fn handle(stream: TcpStream, store: Store) -> std::io::Result<()> {
    let mut out = stream.try_clone()?;
    let mut input = BufReader::new(stream);
    let mut line = String::new();

    while input.read_line(&mut line)? > 0 {
        let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        line.clear();

        let reply = match words.iter().map(String::as_str).collect::<Vec<_>>()[..] {
            ["get", key] => match store.lock().unwrap().get(key) {
                Some((flags, data)) => {
                    let mut reply = format!("VALUE {key} {flags} {}\r\n", data.len()).into_bytes();
                    reply.extend_from_slice(data);
                    reply.extend_from_slice(b"\r\nEND\r\n");
                    reply
                }
                None => b"END\r\n".to_vec(),
            },
            [verb @ ("set" | "add"), key, flags, _, len] => {
                let mut data = vec![0u8; len.parse::<usize>().unwrap_or(0) + 2];
                input.read_exact(&mut data)?;
                data.truncate(data.len() - 2);

                let mut store = store.lock().unwrap();
                if verb == "add" && store.contains_key(key) {
                    b"NOT_STORED\r\n".to_vec()
                } else {
                    store.insert(key.to_string(), (flags.parse().unwrap_or(0), data));
                    b"STORED\r\n".to_vec()
                }
            }
            [verb @ ("incr" | "decr"), key, delta] => {
                let delta: u64 = delta.parse().unwrap_or(0);
                let mut store = store.lock().unwrap();
                let current = store.get_mut(key).map(|entry| {
                    let parsed = std::str::from_utf8(&entry.1).ok().and_then(|text| text.parse::<u64>().ok());
                    (entry, parsed)
                });
                match current {
                    None => b"NOT_FOUND\r\n".to_vec(),
                    Some((_, None)) => {
                        b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec()
                    }
                    Some((entry, Some(value))) => {
                        let next = match verb {
                            "incr" => value.wrapping_add(delta),
                            _ => value.saturating_sub(delta),
                        };
                        entry.1 = next.to_string().into_bytes();
                        format!("{next}\r\n").into_bytes()
                    }
                }
            }
            _ => b"ERROR\r\n".to_vec(),
        };
        out.write_all(&reply)?;
    }
    Ok(())
}
