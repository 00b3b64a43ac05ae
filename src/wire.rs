//! Client-facing WebSocket protocol: JSON text frames, UTF-8.
//!
//! This is deliberately a separate shape from `tick::Tick` -- the wire
//! protocol uses its own field names (`changePercent`, `trade_time`, ...)
//! and renders decimal levels as strings, while the internal `Tick` is the
//! normalized representation caches and the codec share.

use serde::{Deserialize, Serialize};

use crate::tick::{Side, Tick, TickPayload};

/// Messages a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
    GetStats,
}

fn level_pairs(levels: &[crate::tick::DepthLevel]) -> Vec<(String, String)> {
    levels
        .iter()
        .map(|l| (l.price.to_string(), l.quantity.to_string()))
        .collect()
}

/// Events the server sends to clients. Serialized exactly once per
/// broadcast and shared as `Arc<str>` across recipients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "price_update")]
    PriceUpdate {
        symbol: String,
        price: f64,
        change: f64,
        #[serde(rename = "changePercent")]
        change_percent: f64,
        volume: f64,
        timestamp: i64,
    },
    #[serde(rename = "depth_update")]
    DepthUpdate {
        symbol: String,
        bids: Vec<(String, String)>,
        asks: Vec<(String, String)>,
        timestamp: i64,
    },
    #[serde(rename = "trade_update")]
    TradeUpdate {
        symbol: String,
        price: f64,
        quantity: f64,
        is_buyer_maker: bool,
        trade_time: i64,
        timestamp: i64,
    },
    #[serde(rename = "kline_update")]
    KlineUpdate {
        symbol: String,
        interval: String,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        is_closed: bool,
        start_time: i64,
        end_time: i64,
        timestamp: i64,
    },
    #[serde(rename = "mark_price_update")]
    MarkPriceUpdate {
        symbol: String,
        mark_price: f64,
        funding_rate: f64,
        next_funding_time: i64,
        timestamp: i64,
    },
    #[serde(rename = "liquidation_update")]
    LiquidationUpdate {
        symbol: String,
        side: Side,
        price: f64,
        quantity: f64,
        trade_time: i64,
        timestamp: i64,
    },
    #[serde(rename = "subscribed")]
    Subscribed { symbol: String },
    #[serde(rename = "unsubscribed")]
    Unsubscribed { symbol: String },
    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
    #[serde(rename = "stats")]
    Stats {
        client_count: usize,
        subscribed_symbols: Vec<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl From<&Tick> for ServerEvent {
    fn from(tick: &Tick) -> Self {
        let symbol = tick.symbol.clone();
        let timestamp = tick.ingest_time_ms;
        match &tick.payload {
            TickPayload::Price(p) => ServerEvent::PriceUpdate {
                symbol,
                price: p.last,
                change: p.change,
                change_percent: p.change_pct,
                volume: p.volume,
                timestamp,
            },
            TickPayload::Depth(d) => ServerEvent::DepthUpdate {
                symbol,
                bids: level_pairs(&d.bid_deltas),
                asks: level_pairs(&d.ask_deltas),
                timestamp,
            },
            TickPayload::Trade(t) => ServerEvent::TradeUpdate {
                symbol,
                price: t.price,
                quantity: t.qty,
                is_buyer_maker: t.buyer_is_maker,
                trade_time: t.trade_time_ms,
                timestamp,
            },
            TickPayload::Kline(k) => ServerEvent::KlineUpdate {
                symbol,
                interval: k.interval.clone(),
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
                is_closed: k.is_closed,
                start_time: k.start_ms,
                end_time: k.end_ms,
                timestamp,
            },
            TickPayload::MarkPrice(m) => ServerEvent::MarkPriceUpdate {
                symbol,
                mark_price: m.mark_price,
                funding_rate: m.funding_rate,
                next_funding_time: m.next_funding_time_ms,
                timestamp,
            },
            TickPayload::Liquidation(l) => ServerEvent::LiquidationUpdate {
                symbol,
                side: l.side,
                price: l.price,
                quantity: l.orig_qty,
                trade_time: l.trade_time_ms,
                timestamp,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::PricePayload;

    #[test]
    fn price_tick_maps_to_price_update_event() {
        let tick = Tick {
            symbol: "BTCUSDT".into(),
            event_time_ms: 1,
            ingest_time_ms: 2,
            payload: TickPayload::Price(PricePayload {
                last: 30000.5,
                change: 10.0,
                change_pct: 0.03,
                volume: 1234.0,
            }),
        };
        let event = ServerEvent::from(&tick);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "price_update");
        assert_eq!(json["symbol"], "BTCUSDT");
        assert_eq!(json["price"], 30000.5);
        assert_eq!(json["changePercent"], 0.03);
    }

    #[test]
    fn client_request_parses_subscribe() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"subscribe","symbol":"BTCUSDT"}"#).unwrap();
        matches!(req, ClientRequest::Subscribe { symbol } if symbol == "BTCUSDT");
    }
}
