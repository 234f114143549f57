//! # Bridge Load Driver
//!
//! Purpose: Drive the command layer from many worker threads against a live
//! memcached set, to observe pool contention and acquisition timeouts.
//!
//! ## Design Principles
//! 1. **Host-Shaped Workload**: Workers share one `Settings` by reference,
//!    the way request threads do.
//! 2. **Sentinel Accounting**: Failures are counted by comparing results
//!    against the configured sentinels, the only signal callers get.
//! 3. **Deterministic Keys**: A fixed key set keeps runs comparable.
//!
//! Usage: `mcb-bench [config] [threads] [ops_per_thread] [timeout_ms]`

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use mcb_client::check_configuration;
use mcb_vmod::{commands, on_event, Event, Settings, Workspace};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "--SERVER=127.0.0.1:11211";
const DEFAULT_THREADS: usize = 16;
const DEFAULT_OPS: usize = 10_000;
const DEFAULT_TIMEOUT_MS: i64 = 3000;
const KEY_COUNT: usize = 256;
const ERROR_STRING: &str = "__mcb_error__";

struct BenchConfig {
    config: String,
    threads: usize,
    ops: usize,
    timeout_ms: i64,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let config = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
        let threads = parse_or(args.next(), DEFAULT_THREADS).max(1);
        let ops = parse_or(args.next(), DEFAULT_OPS);
        let timeout_ms = parse_or(args.next(), DEFAULT_TIMEOUT_MS);
        BenchConfig {
            config,
            threads,
            ops,
            timeout_ms,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, fallback: T) -> T {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

fn report(label: &str, ops: usize, failures: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!(
        "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op, {failures} failed)"
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let bench = BenchConfig::from_args();
    check_configuration(&bench.config)
        .map_err(anyhow::Error::msg)
        .context("invalid server configuration")?;

    let mut slot: Option<Settings> = None;
    on_event(&mut slot, Event::Load);
    let settings = slot.as_mut().context("settings were not allocated")?;
    settings.servers(&bench.config)?;
    settings.pool_timeout_msec(bench.timeout_ms);
    settings.error_string(ERROR_STRING);

    let keys: Vec<String> = (0..KEY_COUNT).map(|idx| format!("mcb-bench:{idx}")).collect();
    for key in &keys {
        commands::set(settings, key, key, 0, 0);
    }
    info!(threads = bench.threads, ops = bench.ops, "starting workload");

    let settings: &Settings = settings;
    let total = bench.threads * bench.ops;

    let failures = AtomicUsize::new(0);
    let start = Instant::now();
    thread::scope(|scope| {
        for worker in 0..bench.threads {
            let keys = &keys;
            let failures = &failures;
            scope.spawn(move || {
                let mut ws = Workspace::new();
                for op in 0..bench.ops {
                    let key = &keys[(worker + op) % KEY_COUNT];
                    let value = commands::get(settings, &mut ws, key);
                    if value.as_deref() != Some(key.as_bytes()) {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    ws.reset();
                }
            });
        }
    });
    report("GET", total, failures.load(Ordering::Relaxed), start.elapsed());

    let failures = AtomicUsize::new(0);
    let start = Instant::now();
    thread::scope(|scope| {
        for _ in 0..bench.threads {
            let failures = &failures;
            scope.spawn(move || {
                for _ in 0..bench.ops {
                    if commands::incr_set(settings, "mcb-bench:counter", 1, 0, 0)
                        == settings.error_int_value()
                    {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    report("INCR", total, failures.load(Ordering::Relaxed), start.elapsed());

    if let Some(pool) = settings.pool() {
        let stats = pool.stats();
        println!("pool: idle={}, in_use={}, max={}", stats.idle, stats.in_use, stats.max);
    }

    on_event(&mut slot, Event::Discard);
    Ok(())
}
