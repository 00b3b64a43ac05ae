//! Glues a decoded `Tick` to the cache and the Hub: the only place that
//! decides whether a tick gets broadcast to subscribers.

use std::sync::Arc;

use crate::cache::{ApplyOutcome, CacheStore};
use crate::hub::Hub;
use crate::supervisor::StorageSink;
use crate::tick::{Tick, TickPayload};
use crate::wire::ServerEvent;

#[derive(Clone)]
pub struct Pipeline {
    caches: Arc<CacheStore>,
    hub: Hub,
    sink: Arc<dyn StorageSink>,
}

impl Pipeline {
    pub fn new(caches: Arc<CacheStore>, hub: Hub, sink: Arc<dyn StorageSink>) -> Self {
        Self { caches, hub, sink }
    }

    /// Apply `tick` to its symbol's cache and, if the cache accepted it,
    /// serialize once and broadcast to that symbol's subscribers. Only
    /// newly closed klines reach the storage sink.
    pub fn ingest(&self, tick: Tick) {
        let cache = self.caches.get_or_create(&tick.symbol);
        let outcome = cache.apply(&tick);
        if outcome == ApplyOutcome::Stale {
            return;
        }
        if matches!(&tick.payload, TickPayload::Kline(k) if k.is_closed) {
            self.sink.record(&tick);
        }
        if outcome != ApplyOutcome::Applied {
            return;
        }
        let event = ServerEvent::from(&tick);
        let frame: Arc<str> = match serde_json::to_string(&event) {
            Ok(json) => Arc::from(json),
            Err(_) => return,
        };
        self.hub.broadcast(tick.symbol, frame);
    }
}
