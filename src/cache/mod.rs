//! Per-symbol caches: ring buffers for trades/liquidations, latest-value
//! slots for depth/kline/mark-price/last-price.
//!
//! Each `SymbolCache` is a single `parking_lot::RwLock` covering its whole
//! state: one lock per symbol rather than one lock for the whole registry.
//! Writes come from the owning adapter's single read loop; reads come from
//! HTTP handlers and the Hub's broadcast path.

mod ring;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use ring::RingBuffer;

use crate::metrics;
use crate::tick::{DepthPayload, Symbol, Tick, TickPayload};

pub const DEFAULT_TRADE_RING_CAP: usize = 1_000;
pub const DEFAULT_LIQUIDATION_RING_CAP: usize = 1_000;

/// What happened when a tick was applied to a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Cache updated; the tick should be broadcast.
    Applied,
    /// `eventTimeMs` regressed for this `(symbol, kind)`; cache untouched.
    Stale,
    /// Cache updated (so `lastPrice` stays current) but the move was below
    /// the configured micro-movement threshold, so it is not broadcast.
    Suppressed,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheSnapshot {
    pub last_price: Option<f64>,
    pub depth: Option<DepthPayload>,
    pub trades: Vec<Tick>,
    pub klines: HashMap<String, Tick>,
    pub mark_price: Option<Tick>,
    pub liquidations: Vec<Tick>,
}

struct Inner {
    last_price: Option<f64>,
    depth: Option<DepthPayload>,
    trades: RingBuffer<Tick>,
    klines: HashMap<String, Tick>,
    mark_price: Option<Tick>,
    liquidations: RingBuffer<Tick>,
    last_event_time: HashMap<String, i64>,
}

impl Inner {
    fn new(trade_cap: usize, liquidation_cap: usize) -> Self {
        Self {
            last_price: None,
            depth: None,
            trades: RingBuffer::new(trade_cap),
            klines: HashMap::new(),
            mark_price: None,
            liquidations: RingBuffer::new(liquidation_cap),
            last_event_time: HashMap::new(),
        }
    }
}

/// The staleness key for a tick: klines are keyed per-interval, everything
/// else is keyed by stream kind alone.
fn staleness_key(payload: &TickPayload) -> String {
    match payload {
        TickPayload::Price(_) => "price".to_string(),
        TickPayload::Depth(_) => "depth".to_string(),
        TickPayload::Trade(_) => "trade".to_string(),
        TickPayload::MarkPrice(_) => "mark_price".to_string(),
        TickPayload::Liquidation(_) => "liquidation".to_string(),
        TickPayload::Kline(k) => format!("kline:{}", k.interval),
    }
}

pub struct SymbolCache {
    inner: RwLock<Inner>,
    /// Micro-movement filter, as a fraction (e.g. 0.0001 = 0.01%). `0.0` disables it.
    price_change_threshold: f64,
}

impl SymbolCache {
    pub fn new(trade_cap: usize, liquidation_cap: usize, price_change_threshold: f64) -> Self {
        Self {
            inner: RwLock::new(Inner::new(trade_cap, liquidation_cap)),
            price_change_threshold,
        }
    }

    pub fn apply(&self, tick: &Tick) -> ApplyOutcome {
        let key = staleness_key(&tick.payload);
        let mut inner = self.inner.write();

        if let Some(&last_event_time) = inner.last_event_time.get(&key) {
            if tick.event_time_ms < last_event_time {
                drop(inner);
                metrics::stale_drop();
                return ApplyOutcome::Stale;
            }
        }
        inner.last_event_time.insert(key, tick.event_time_ms);

        match &tick.payload {
            TickPayload::Price(p) => {
                let prev = inner.last_price;
                inner.last_price = Some(p.last);
                if self.price_change_threshold > 0.0 {
                    if let Some(prev) = prev {
                        if prev > 0.0 {
                            let delta = ((p.last - prev) / prev).abs();
                            if delta < self.price_change_threshold {
                                return ApplyOutcome::Suppressed;
                            }
                        }
                    }
                }
            }
            TickPayload::Depth(d) => {
                inner.depth = Some(d.clone());
            }
            TickPayload::Trade(_) => {
                inner.trades.push(tick.clone());
            }
            TickPayload::Kline(k) => {
                inner.klines.insert(k.interval.clone(), tick.clone());
            }
            TickPayload::MarkPrice(_) => {
                inner.mark_price = Some(tick.clone());
            }
            TickPayload::Liquidation(_) => {
                inner.liquidations.push(tick.clone());
            }
        }

        ApplyOutcome::Applied
    }

    pub fn last_price(&self) -> Option<f64> {
        self.inner.read().last_price
    }

    pub fn depth(&self) -> Option<DepthPayload> {
        self.inner.read().depth.clone()
    }

    pub fn recent_trades(&self, limit: usize) -> Vec<Tick> {
        self.inner.read().trades.recent(limit)
    }

    pub fn kline(&self, interval: &str) -> Option<Tick> {
        self.inner.read().klines.get(interval).cloned()
    }

    pub fn mark_price(&self) -> Option<Tick> {
        self.inner.read().mark_price.clone()
    }

    pub fn recent_liquidations(&self, limit: usize) -> Vec<Tick> {
        self.inner.read().liquidations.recent(limit)
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let inner = self.inner.read();
        CacheSnapshot {
            last_price: inner.last_price,
            depth: inner.depth.clone(),
            trades: inner.trades.recent(inner.trades.capacity()),
            klines: inner.klines.clone(),
            mark_price: inner.mark_price.clone(),
            liquidations: inner.liquidations.recent(inner.liquidations.capacity()),
        }
    }
}

/// Registry of `SymbolCache`s, created lazily on first tick or explicit add.
pub struct CacheStore {
    caches: RwLock<HashMap<Symbol, Arc<SymbolCache>>>,
    trade_cap: usize,
    liquidation_cap: usize,
    price_change_threshold: f64,
}

impl CacheStore {
    pub fn new(trade_cap: usize, liquidation_cap: usize, price_change_threshold: f64) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            trade_cap,
            liquidation_cap,
            price_change_threshold,
        }
    }

    /// Get or lazily create the cache for `symbol`.
    pub fn get_or_create(&self, symbol: &str) -> Arc<SymbolCache> {
        if let Some(existing) = self.caches.read().get(symbol) {
            return existing.clone();
        }
        let mut caches = self.caches.write();
        caches
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(SymbolCache::new(
                    self.trade_cap,
                    self.liquidation_cap,
                    self.price_change_threshold,
                ))
            })
            .clone()
    }

    /// Look up an existing cache without creating one (used by HTTP read-through).
    pub fn get(&self, symbol: &str) -> Option<Arc<SymbolCache>> {
        self.caches.read().get(symbol).cloned()
    }

    pub fn symbol_count(&self) -> usize {
        self.caches.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::{PricePayload, TickPayload};

    fn price_tick(symbol: &str, event_time_ms: i64, last: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            event_time_ms,
            ingest_time_ms: event_time_ms,
            payload: TickPayload::Price(PricePayload {
                last,
                change: 0.0,
                change_pct: 0.0,
                volume: 0.0,
            }),
        }
    }

    #[test]
    fn stale_tick_is_rejected_and_last_price_unchanged() {
        let cache = SymbolCache::new(10, 10, 0.0);
        assert_eq!(cache.apply(&price_tick("BTCUSDT", 100, 30000.0)), ApplyOutcome::Applied);
        assert_eq!(cache.apply(&price_tick("BTCUSDT", 50, 29000.0)), ApplyOutcome::Stale);
        assert_eq!(cache.last_price(), Some(30000.0));
    }

    #[test]
    fn micro_movement_filter_suppresses_small_moves_but_still_updates_last_price() {
        let cache = SymbolCache::new(10, 10, 0.01); // 1%
        assert_eq!(cache.apply(&price_tick("BTCUSDT", 1, 100.0)), ApplyOutcome::Applied);
        // 0.5% move: below threshold.
        assert_eq!(cache.apply(&price_tick("BTCUSDT", 2, 100.5)), ApplyOutcome::Suppressed);
        assert_eq!(cache.last_price(), Some(100.5));
    }

    #[test]
    fn ring_buffers_never_exceed_capacity() {
        let cache = SymbolCache::new(3, 3, 0.0);
        for i in 0..20 {
            let mut t = price_tick("BTCUSDT", i, 1.0);
            t.payload = TickPayload::Trade(crate::tick::TradePayload {
                price: 1.0,
                qty: 1.0,
                trade_time_ms: i,
                buyer_is_maker: false,
            });
            cache.apply(&t);
        }
        assert_eq!(cache.recent_trades(100).len(), 3);
    }

    #[test]
    fn cache_store_creates_lazily_and_reuses() {
        let store = CacheStore::new(10, 10, 0.0);
        assert!(store.get("BTCUSDT").is_none());
        let a = store.get_or_create("BTCUSDT");
        let b = store.get_or_create("BTCUSDT");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.symbol_count(), 1);
    }
}
