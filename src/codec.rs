//! Message codec: decode combined-stream envelopes and typed payloads.
//!
//! `decode` never panics. Every numeric field arrives as a decimal string on
//! the wire and is parsed through `parse_decimal`, which returns `0.0` and
//! bumps `decode_errors_total` on failure instead of propagating an error --
//! a single bad field should not sink an otherwise-parseable tick.

use serde_json::Value;
use thiserror::Error;

use crate::metrics;
use crate::tick::{
    DepthLevel, DepthPayload, KlinePayload, LiquidationPayload, MarkPricePayload, PricePayload,
    Side, Tick, TickPayload, TradePayload,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid JSON or has no recognizable envelope shape")]
    MalformedEnvelope,
    #[error("unrecognized stream suffix: {0}")]
    UnknownStream(String),
    #[error("liquidation side was neither BUY nor SELL: {0}")]
    InvalidSide(String),
}

/// Parse a decimal string field. Never fails: on error it counts a decode
/// error and substitutes 0.0 rather than propagating a parse failure.
pub fn parse_decimal(raw: &str) -> f64 {
    match fast_float::parse::<f64, _>(raw) {
        Ok(v) => v,
        Err(_) => {
            metrics::decode_error();
            0.0
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decode one upstream WebSocket text frame into zero or more normalized ticks.
///
/// Combined-stream wrapper frames (`{"stream":..,"data":..}`) are the common
/// case; array frames (`!markPrice@arr@1s`) and bare typed payloads are also
/// accepted as fallbacks, in that order.
pub fn decode(text: &str) -> Result<Vec<Tick>, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::MalformedEnvelope)?;

    if let Some(stream) = value.get("stream").and_then(Value::as_str) {
        let data = value.get("data").ok_or(DecodeError::MalformedEnvelope)?;
        return decode_combined(stream, data);
    }

    if let Some(array) = value.as_array() {
        // Bare array fallback: treat each element as a direct typed payload,
        // trying ticker, depth, trade, kline in order.
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            if let Some(tick) = decode_direct(item) {
                out.push(tick);
            }
        }
        return Ok(out);
    }

    decode_direct(&value)
        .map(|t| vec![t])
        .ok_or(DecodeError::MalformedEnvelope)
}

fn decode_combined(stream: &str, data: &Value) -> Result<Vec<Tick>, DecodeError> {
    let suffix = stream
        .split_once('@')
        .map(|(_, suffix)| suffix)
        .unwrap_or(stream)
        .to_ascii_lowercase();

    // Global streams carry no per-symbol prefix (e.g. "!forceorder@arr").
    if suffix.starts_with("forceorder") || stream.eq_ignore_ascii_case("!forceOrder@arr") {
        return decode_liquidation_frame(data).map(|t| vec![t]);
    }
    if suffix.starts_with("markprice@arr") {
        return decode_mark_price_array(data);
    }

    match suffix.as_str() {
        "ticker" => decode_ticker(data).map(|t| vec![t]),
        "depth" | "depth@100ms" => decode_depth(data).map(|t| vec![t]),
        "trade" | "aggtrade" => decode_trade(data).map(|t| vec![t]),
        "markprice" => decode_mark_price(data).map(|t| vec![t]),
        s if s.starts_with("kline_") => {
            let interval = &s["kline_".len()..];
            decode_kline(data, interval).map(|t| vec![t])
        }
        other => Err(DecodeError::UnknownStream(other.to_string())),
    }
}

/// Direct (un-wrapped) typed payload fallback: ticker, depth, trade, kline in order.
fn decode_direct(data: &Value) -> Option<Tick> {
    if data.get("c").is_some() && data.get("P").is_some() {
        return decode_ticker(data).ok();
    }
    if data.get("b").is_some() && data.get("a").is_some() && data.get("U").is_some() {
        return decode_depth(data).ok();
    }
    if data.get("p").is_some() && data.get("q").is_some() && data.get("m").is_some() {
        return decode_trade(data).ok();
    }
    if data.get("k").is_some() {
        let interval = data["k"].get("i").and_then(Value::as_str)?;
        return decode_kline(data, interval).ok();
    }
    None
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("0")
}

fn symbol_field(data: &Value) -> String {
    data.get("s")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn i64_field(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn bool_field(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn decode_ticker(data: &Value) -> Result<Tick, DecodeError> {
    let symbol = symbol_field(data);
    let event_time_ms = i64_field(data, "E");
    let payload = PricePayload {
        last: parse_decimal(str_field(data, "c")),
        change: parse_decimal(str_field(data, "p")),
        change_pct: parse_decimal(str_field(data, "P")),
        volume: parse_decimal(str_field(data, "v")),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::Price(payload),
    })
}

fn decode_levels(data: &Value, key: &str) -> Vec<DepthLevel> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let price = parse_decimal(row.first()?.as_str()?);
                    let quantity = parse_decimal(row.get(1)?.as_str()?);
                    Some(DepthLevel { price, quantity })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_depth(data: &Value) -> Result<Tick, DecodeError> {
    let symbol = symbol_field(data);
    let event_time_ms = i64_field(data, "E");
    let payload = DepthPayload {
        first_update_id: data.get("U").and_then(Value::as_u64).unwrap_or(0),
        final_update_id: data.get("u").and_then(Value::as_u64).unwrap_or(0),
        bid_deltas: decode_levels(data, "b"),
        ask_deltas: decode_levels(data, "a"),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::Depth(payload),
    })
}

fn decode_trade(data: &Value) -> Result<Tick, DecodeError> {
    let symbol = symbol_field(data);
    let event_time_ms = i64_field(data, "E");
    let payload = TradePayload {
        price: parse_decimal(str_field(data, "p")),
        qty: parse_decimal(str_field(data, "q")),
        trade_time_ms: i64_field(data, "T"),
        buyer_is_maker: bool_field(data, "m"),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::Trade(payload),
    })
}

fn decode_kline(data: &Value, interval: &str) -> Result<Tick, DecodeError> {
    let symbol = symbol_field(data);
    let event_time_ms = i64_field(data, "E");
    let k = data.get("k").unwrap_or(data);
    let payload = KlinePayload {
        interval: interval.to_string(),
        open: parse_decimal(str_field(k, "o")),
        high: parse_decimal(str_field(k, "h")),
        low: parse_decimal(str_field(k, "l")),
        close: parse_decimal(str_field(k, "c")),
        volume: parse_decimal(str_field(k, "v")),
        start_ms: i64_field(k, "t"),
        end_ms: i64_field(k, "T"),
        is_closed: bool_field(k, "x"),
        taker_buy_base_volume: parse_decimal(str_field(k, "V")),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::Kline(payload),
    })
}

fn decode_mark_price_one(data: &Value) -> Result<Tick, DecodeError> {
    let symbol = symbol_field(data);
    let event_time_ms = i64_field(data, "E");
    let payload = MarkPricePayload {
        mark_price: parse_decimal(str_field(data, "p")),
        funding_rate: parse_decimal(str_field(data, "r")),
        next_funding_time_ms: i64_field(data, "T"),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::MarkPrice(payload),
    })
}

fn decode_mark_price(data: &Value) -> Result<Tick, DecodeError> {
    decode_mark_price_one(data)
}

fn decode_mark_price_array(data: &Value) -> Result<Vec<Tick>, DecodeError> {
    let items = data.as_array().ok_or(DecodeError::MalformedEnvelope)?;
    Ok(items.iter().filter_map(|v| decode_mark_price_one(v).ok()).collect())
}

fn decode_liquidation_frame(data: &Value) -> Result<Tick, DecodeError> {
    let order = data.get("o").unwrap_or(data);
    let symbol = symbol_field(order);
    let raw_side = str_field(order, "S");
    let side = Side::parse(raw_side).ok_or_else(|| DecodeError::InvalidSide(raw_side.to_string()))?;
    let event_time_ms = i64_field(data, "E");
    let payload = LiquidationPayload {
        side,
        price: parse_decimal(str_field(order, "p")),
        orig_qty: parse_decimal(str_field(order, "q")),
        avg_price: parse_decimal(str_field(order, "ap")),
        trade_time_ms: i64_field(order, "T"),
    };
    Ok(Tick {
        symbol,
        event_time_ms,
        ingest_time_ms: now_ms(),
        payload: TickPayload::Liquidation(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_combined_ticker() {
        let frame = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"30000.5","p":"10","P":"0.03","v":"1234"}}"#;
        let ticks = decode(frame).unwrap();
        assert_eq!(ticks.len(), 1);
        let tick = &ticks[0];
        assert_eq!(tick.symbol, "BTCUSDT");
        match &tick.payload {
            TickPayload::Price(p) => {
                assert_eq!(p.last, 30000.5);
                assert_eq!(p.change, 10.0);
                assert_eq!(p.change_pct, 0.03);
                assert_eq!(p.volume, 1234.0);
            }
            other => panic!("expected price payload, got {other:?}"),
        }
    }

    #[test]
    fn decodes_force_order_liquidation() {
        let frame = r#"{"stream":"!forceOrder@arr","data":{"e":"forceOrder","E":1700000000000,"o":{"s":"ETHUSDT","S":"SELL","q":"2.5","p":"1800","ap":"1800","T":1700000000000}}}"#;
        let ticks = decode(frame).unwrap();
        assert_eq!(ticks.len(), 1);
        match &ticks[0].payload {
            TickPayload::Liquidation(l) => {
                assert_eq!(l.side, Side::Sell);
                assert_eq!(l.price, 1800.0);
                assert_eq!(l.orig_qty, 2.5);
            }
            other => panic!("expected liquidation payload, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_liquidation_side() {
        let frame = r#"{"stream":"!forceOrder@arr","data":{"o":{"s":"ETHUSDT","S":"HOLD","q":"2.5","p":"1800","ap":"1800","T":1}}}"#;
        let err = decode(frame).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidSide(_)));
    }

    #[test]
    fn unknown_suffix_is_dropped_not_fatal() {
        let frame = r#"{"stream":"btcusdt@bookTicker","data":{}}"#;
        let err = decode(frame).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownStream(_)));
    }

    #[test]
    fn decodes_kline_update() {
        let frame = r#"{"stream":"btcusdt@kline_1m","data":{"E":1700000000000,"s":"BTCUSDT","k":{"t":1,"T":2,"i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","V":"4","x":true}}}"#;
        let ticks = decode(frame).unwrap();
        match &ticks[0].payload {
            TickPayload::Kline(k) => {
                assert_eq!(k.interval, "1m");
                assert!(k.is_closed);
                assert_eq!(k.taker_buy_base_volume, 4.0);
            }
            other => panic!("expected kline payload, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_not_a_panic() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err, DecodeError::MalformedEnvelope);
    }

    #[test]
    fn parse_decimal_never_panics_on_garbage() {
        assert_eq!(parse_decimal("abc"), 0.0);
        assert_eq!(parse_decimal("12.5"), 12.5);
    }
}
