//! In-memory `CachePool` double with lease accounting and fault injection.

#![allow(dead_code)]

pub mod server;

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mcb_client::{ClientError, ClientResult};
use mcb_vmod::{CacheConnection, CachePool};

/// Keys starting with this prefix fail with a server error.
pub const FAIL_PREFIX: &str = "fail:";

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    capacity: usize,
    leased: Mutex<usize>,
    freed: Condvar,
    acquired: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        MemoryPool {
            inner: Arc::new(Inner {
                store: Arc::new(Mutex::new(HashMap::new())),
                capacity,
                leased: Mutex::new(0),
                freed: Condvar::new(),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.inner
            .store
            .lock()
            .unwrap()
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn leased(&self) -> usize {
        *self.inner.leased.lock().unwrap()
    }
}

impl CachePool for MemoryPool {
    type Conn = MemoryConn;

    fn acquire(&self, timeout: Duration) -> Option<MemoryConn> {
        let leased = self.inner.leased.lock().unwrap();
        let (mut leased, _) = self
            .inner
            .freed
            .wait_timeout_while(leased, timeout, |leased| *leased >= self.inner.capacity)
            .unwrap();
        if *leased >= self.inner.capacity {
            return None;
        }
        *leased += 1;
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Some(MemoryConn {
            store: self.inner.store.clone(),
            last_error: None,
        })
    }

    fn release(&self, _conn: MemoryConn) {
        *self.inner.leased.lock().unwrap() -= 1;
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        self.inner.freed.notify_one();
    }

    fn destroy(&self) {
        self.inner.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MemoryConn {
    store: Store,
    last_error: Option<String>,
}

impl MemoryConn {
    fn check(&mut self, key: &[u8]) -> ClientResult<()> {
        self.last_error = None;
        if key.is_empty() {
            return Err(ClientError::BadKey);
        }
        if key.starts_with(FAIL_PREFIX.as_bytes()) {
            self.last_error = Some("injected failure".to_string());
            return Err(ClientError::Server {
                message: b"injected failure".to_vec(),
            });
        }
        Ok(())
    }

    fn counter(&mut self, key: &[u8], apply: impl FnOnce(u64) -> u64) -> ClientResult<u64> {
        self.check(key)?;
        let mut store = self.store.lock().unwrap();
        let data = store.get_mut(key).ok_or(ClientError::NotFound)?;
        let current = std::str::from_utf8(data)
            .ok()
            .and_then(|text| text.parse::<u64>().ok());
        match current {
            Some(current) => {
                let next = apply(current);
                *data = next.to_string().into_bytes();
                Ok(next)
            }
            None => {
                drop(store);
                let message = "cannot increment or decrement non-numeric value";
                self.last_error = Some(message.to_string());
                Err(ClientError::Client {
                    message: message.as_bytes().to_vec(),
                })
            }
        }
    }

    fn seeded(&mut self, key: &[u8], initial: u64, apply: impl FnOnce(u64) -> u64) -> ClientResult<u64> {
        match self.counter(key, apply) {
            Err(ClientError::NotFound) => {
                self.store
                    .lock()
                    .unwrap()
                    .insert(key.to_vec(), initial.to_string().into_bytes());
                Ok(initial)
            }
            other => other,
        }
    }
}

impl CacheConnection for MemoryConn {
    fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.check(key)?;
        Ok(self.store.lock().unwrap().get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8], _expiration: i64, _flags: u32) -> ClientResult<()> {
        self.check(key)?;
        self.store.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn increment(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        self.counter(key, |value| value.wrapping_add(offset))
    }

    fn decrement(&mut self, key: &[u8], offset: u64) -> ClientResult<u64> {
        self.counter(key, |value| value.saturating_sub(offset))
    }

    fn increment_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        _expiration: i64,
    ) -> ClientResult<u64> {
        self.seeded(key, initial, |value| value.wrapping_add(offset))
    }

    fn decrement_with_initial(
        &mut self,
        key: &[u8],
        offset: u64,
        initial: u64,
        _expiration: i64,
    ) -> ClientResult<u64> {
        self.seeded(key, initial, |value| value.saturating_sub(offset))
    }

    fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// `io::Write` sink collecting formatted log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a subscriber writing into the returned capture.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    capture.contents()
}
