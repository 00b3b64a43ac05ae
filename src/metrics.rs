//! Process-wide counters (C8).
//!
//! Plain atomics behind a global accessor -- no external metrics crate,
//! just numbers the HTTP layer and the WebSocket `getStats` reply can read
//! without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    pub decode_errors: AtomicU64,
    pub stale_drops: AtomicU64,
    pub ring_evictions: AtomicU64,
    pub slow_consumer_warnings: AtomicU64,
    pub slow_consumer_evictions: AtomicU64,
    pub reconnects: AtomicU64,
    pub ticks_broadcast: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub decode_errors: u64,
    pub stale_drops: u64,
    pub ring_evictions: u64,
    pub slow_consumer_warnings: u64,
    pub slow_consumer_evictions: u64,
    pub reconnects: u64,
    pub ticks_broadcast: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stale_drops: self.stale_drops.load(Ordering::Relaxed),
            ring_evictions: self.ring_evictions.load(Ordering::Relaxed),
            slow_consumer_warnings: self.slow_consumer_warnings.load(Ordering::Relaxed),
            slow_consumer_evictions: self.slow_consumer_evictions.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            ticks_broadcast: self.ticks_broadcast.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn global() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub fn snapshot() -> MetricsSnapshot {
    global().snapshot()
}

pub fn decode_error() {
    global().decode_errors.fetch_add(1, Ordering::Relaxed);
}

pub fn stale_drop() {
    global().stale_drops.fetch_add(1, Ordering::Relaxed);
}

pub fn ring_eviction() {
    global().ring_evictions.fetch_add(1, Ordering::Relaxed);
}

pub fn slow_consumer_warning() {
    global().slow_consumer_warnings.fetch_add(1, Ordering::Relaxed);
}

pub fn slow_consumer_eviction() {
    global().slow_consumer_evictions.fetch_add(1, Ordering::Relaxed);
}

pub fn reconnect() {
    global().reconnects.fetch_add(1, Ordering::Relaxed);
}

pub fn tick_broadcast() {
    global().ticks_broadcast.fetch_add(1, Ordering::Relaxed);
}
