//! Supervisor: owns the Hub, both upstream adapters, and the cache store,
//! and is the single type HTTP handlers and the WebSocket upgrade handler
//! reach through to get at any of them.

use std::sync::Arc;

use serde::Serialize;

use crate::adapter::{AdapterConfig, AdapterState, Market, UpstreamAdapter};
use crate::cache::{CacheSnapshot, CacheStore};
use crate::config::Config;
use crate::hub::{Hub, HubStats};
use crate::metrics::{self, MetricsSnapshot};
use crate::pipeline::Pipeline;
use crate::tick::{DepthPayload, Symbol, Tick};

/// Extension point for persisting ticks somewhere durable (a database, a
/// message queue, ...). The default is a no-op: this service's contract
/// is live distribution, not storage.
pub trait StorageSink: Send + Sync {
    fn record(&self, _tick: &Tick) {}
}

pub struct NoopSink;
impl StorageSink for NoopSink {}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    pub state: AdapterState,
    pub symbol_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    pub hub: HubStats,
    pub metrics: MetricsSnapshot,
    pub spot_adapter: AdapterStats,
    pub futures_adapter: AdapterStats,
    pub cached_symbol_count: usize,
}

pub struct Supervisor {
    caches: Arc<CacheStore>,
    hub: Hub,
    spot_adapter: Arc<UpstreamAdapter>,
    futures_adapter: Arc<UpstreamAdapter>,
}

impl Supervisor {
    /// Build the Hub, the cache store, and both adapters, and spawn the
    /// adapters' connection loops. `sink` is consulted on every accepted
    /// tick from either adapter.
    pub fn spawn(config: &Config, sink: Arc<dyn StorageSink>) -> Arc<Self> {
        let caches = Arc::new(CacheStore::new(
            config.trade_ring_cap,
            config.liquidation_ring_cap,
            config.price_change_threshold_pct,
        ));
        let hub = Hub::spawn(config.send_queue_cap);
        let pipeline = Pipeline::new(caches.clone(), hub.clone(), sink);

        let spot_adapter = UpstreamAdapter::new(
            Market::Spot,
            AdapterConfig {
                base_url: config.spot_base_url.clone(),
                intervals: config.kline_intervals.clone(),
            },
            config.symbols.clone(),
            pipeline.clone(),
        );
        let futures_adapter = UpstreamAdapter::new(
            Market::Futures,
            AdapterConfig {
                base_url: config.futures_base_url.clone(),
                intervals: config.kline_intervals.clone(),
            },
            config.symbols.clone(),
            pipeline,
        );

        tokio::spawn(spot_adapter.clone().run());
        tokio::spawn(futures_adapter.clone().run());

        Arc::new(Self {
            caches,
            hub,
            spot_adapter,
            futures_adapter,
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Add a symbol to both adapters' subscription lists, reconnecting each
    /// so the new subscription takes effect.
    pub fn add_symbol(&self, symbol: Symbol) {
        self.spot_adapter.add_symbol(symbol.clone());
        self.futures_adapter.add_symbol(symbol);
    }

    pub fn get_last_price(&self, symbol: &str) -> Option<f64> {
        self.caches.get(symbol)?.last_price()
    }

    pub fn get_depth(&self, symbol: &str) -> Option<DepthPayload> {
        self.caches.get(symbol)?.depth()
    }

    /// `None` both when the symbol has no cache yet and when it does but has
    /// not recorded a trade yet, matching the all-or-nothing 404 the other
    /// getters use -- an empty trade list is indistinguishable from "nothing
    /// cached for this symbol" to a caller of `GET /trades/:symbol`.
    pub fn get_recent_trades(&self, symbol: &str, limit: usize) -> Option<Vec<Tick>> {
        let trades = self.caches.get(symbol)?.recent_trades(limit);
        if trades.is_empty() {
            return None;
        }
        Some(trades)
    }

    pub fn get_kline(&self, symbol: &str, interval: &str) -> Option<Tick> {
        self.caches.get(symbol)?.kline(interval)
    }

    pub fn get_mark_price(&self, symbol: &str) -> Option<Tick> {
        self.caches.get(symbol)?.mark_price()
    }

    /// Same all-or-nothing 404 reasoning as `get_recent_trades`.
    pub fn get_recent_liquidations(&self, symbol: &str, limit: usize) -> Option<Vec<Tick>> {
        let liquidations = self.caches.get(symbol)?.recent_liquidations(limit);
        if liquidations.is_empty() {
            return None;
        }
        Some(liquidations)
    }

    pub fn get_snapshot(&self, symbol: &str) -> Option<CacheSnapshot> {
        Some(self.caches.get(symbol)?.snapshot())
    }

    pub async fn get_stats(&self) -> SupervisorStats {
        SupervisorStats {
            hub: self.hub.stats().await,
            metrics: metrics::snapshot(),
            spot_adapter: AdapterStats {
                state: self.spot_adapter.state(),
                symbol_count: self.spot_adapter.symbols().len(),
            },
            futures_adapter: AdapterStats {
                state: self.futures_adapter.state(),
                symbol_count: self.futures_adapter.symbols().len(),
            },
            cached_symbol_count: self.caches.symbol_count(),
        }
    }
}
