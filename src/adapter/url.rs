//! Subscription URL construction for the combined-stream endpoint.

use crate::tick::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Spot,
    Futures,
}

/// Build the `?streams=...` query string for one market, given the current
/// symbol list and the configured kline intervals.
///
/// Spot per-symbol streams: `ticker`, `depth@100ms`, `trade`, plus one
/// `kline_<interval>` per interval. Futures additionally carries `aggTrade`
/// and `markPrice`, and appends the two global streams `!forceOrder@arr`
/// and `!markPrice@arr@1s` once, regardless of symbol count.
pub fn build_subscription_url(base_url: &str, market: Market, symbols: &[Symbol], intervals: &[String]) -> String {
    let mut streams: Vec<String> = Vec::new();

    for symbol in symbols {
        let lower = symbol.to_ascii_lowercase();
        streams.push(format!("{lower}@ticker"));
        streams.push(format!("{lower}@depth@100ms"));
        match market {
            Market::Spot => streams.push(format!("{lower}@trade")),
            Market::Futures => {
                streams.push(format!("{lower}@aggTrade"));
                streams.push(format!("{lower}@markPrice"));
            }
        }
        for interval in intervals {
            streams.push(format!("{lower}@kline_{interval}"));
        }
    }

    if market == Market::Futures {
        streams.push("!forceOrder@arr".to_string());
        streams.push("!markPrice@arr@1s".to_string());
    }

    format!("{base_url}?streams={}", streams.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_url_has_three_streams_per_symbol_plus_one_per_interval() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let intervals = vec!["1m".to_string()];
        let url = build_subscription_url("wss://stream.example.com/stream", Market::Spot, &symbols, &intervals);
        let streams = url.split("?streams=").nth(1).unwrap().split('/').count();
        assert_eq!(streams, symbols.len() * (3 + intervals.len()));
        assert!(url.contains("btcusdt@ticker"));
        assert!(url.contains("btcusdt@depth@100ms"));
        assert!(url.contains("btcusdt@trade"));
        assert!(url.contains("btcusdt@kline_1m"));
        assert!(!url.contains("forceOrder"));
    }

    #[test]
    fn futures_url_adds_agg_trade_mark_price_and_two_global_streams() {
        let symbols = vec!["BTCUSDT".to_string()];
        let intervals = vec!["1m".to_string(), "5m".to_string()];
        let url = build_subscription_url("wss://fstream.example.com/stream", Market::Futures, &symbols, &intervals);
        let streams = url.split("?streams=").nth(1).unwrap().split('/').count();
        assert_eq!(streams, symbols.len() * (5 + intervals.len()) + 2);
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("btcusdt@markPrice"));
        assert!(url.contains("!forceOrder@arr"));
        assert!(url.contains("!markPrice@arr@1s"));
    }

    #[test]
    fn empty_symbol_list_still_carries_futures_global_streams() {
        let url = build_subscription_url("wss://fstream.example.com/stream", Market::Futures, &[], &[]);
        assert!(url.ends_with("!forceOrder@arr/!markPrice@arr@1s"));
    }
}
