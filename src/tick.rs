//! Normalized tick types shared by the codec, caches, and the Hub.
//!
//! Every upstream message is decoded into exactly one `Tick` variant before
//! it touches a `SymbolCache` or the Hub. Wire-format detail lives in
//! `codec`; this module only knows about the normalized shape.

use serde::{Deserialize, Serialize};

pub type Symbol = String;

/// The closed set of stream kinds the upstream adapters classify messages into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Price,
    Depth,
    Trade,
    Kline,
    MarkPrice,
    Liquidation,
}

/// One `(price, quantity)` level in a depth delta. `quantity == 0` means "remove this level".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePayload {
    pub last: f64,
    pub change: f64,
    pub change_pct: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthPayload {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bid_deltas: Vec<DepthLevel>,
    pub ask_deltas: Vec<DepthLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePayload {
    pub price: f64,
    pub qty: f64,
    pub trade_time_ms: i64,
    pub buyer_is_maker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlinePayload {
    pub interval: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_ms: i64,
    pub end_ms: i64,
    pub is_closed: bool,
    pub taker_buy_base_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkPricePayload {
    pub mark_price: f64,
    pub funding_rate: f64,
    pub next_funding_time_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationPayload {
    pub side: Side,
    pub price: f64,
    pub orig_qty: f64,
    pub avg_price: f64,
    pub trade_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TickPayload {
    Price(PricePayload),
    Depth(DepthPayload),
    Trade(TradePayload),
    Kline(KlinePayload),
    MarkPrice(MarkPricePayload),
    Liquidation(LiquidationPayload),
}

impl TickPayload {
    pub fn stream_kind(&self) -> StreamKind {
        match self {
            TickPayload::Price(_) => StreamKind::Price,
            TickPayload::Depth(_) => StreamKind::Depth,
            TickPayload::Trade(_) => StreamKind::Trade,
            TickPayload::Kline(_) => StreamKind::Kline,
            TickPayload::MarkPrice(_) => StreamKind::MarkPrice,
            TickPayload::Liquidation(_) => StreamKind::Liquidation,
        }
    }
}

/// A fully normalized, classified tick ready for caching and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub event_time_ms: i64,
    pub ingest_time_ms: i64,
    pub payload: TickPayload,
}

impl Tick {
    pub fn stream_kind(&self) -> StreamKind {
        self.payload.stream_kind()
    }
}
