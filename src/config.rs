//! Runtime configuration, loaded from the environment (`.env` honored via
//! `dotenv`), mirroring the `Config::from_env` shape used elsewhere in this
//! codebase.

use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub symbols: Vec<String>,
    pub kline_intervals: Vec<String>,
    pub spot_base_url: String,
    pub futures_base_url: String,

    pub pong_wait_secs: u64,
    pub ping_period_secs: u64,
    pub write_wait_secs: u64,
    pub send_queue_cap: usize,

    pub trade_ring_cap: usize,
    pub liquidation_ring_cap: usize,

    pub price_change_threshold_pct: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let symbols: Vec<String> = std::env::var("SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            bail!("SYMBOLS must list at least one symbol (comma-separated)");
        }

        let kline_intervals: Vec<String> = std::env::var("KLINE_INTERVALS")
            .unwrap_or_else(|_| "1m".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let spot_base_url = std::env::var("SPOT_BASE_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com:9443/stream".to_string());
        let futures_base_url = std::env::var("FUTURES_BASE_URL")
            .unwrap_or_else(|_| "wss://fstream.binance.com/stream".to_string());

        let pong_wait_secs = env_parse("PONG_WAIT_SECS", 60);
        let ping_period_secs = env_parse("PING_PERIOD_SECS", 54);
        let write_wait_secs = env_parse("WRITE_WAIT_SECS", 10);
        let send_queue_cap = env_parse("SEND_QUEUE_CAP", 256);

        let trade_ring_cap = env_parse("TRADE_RING_CAP", 1_000);
        let liquidation_ring_cap = env_parse("LIQUIDATION_RING_CAP", 1_000);

        let price_change_threshold_pct = std::env::var("PRICE_CHANGE_THRESHOLD_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        Ok(Self {
            port,
            symbols,
            kline_intervals,
            spot_base_url,
            futures_base_url,
            pong_wait_secs,
            ping_period_secs,
            write_wait_secs,
            send_queue_cap,
            trade_ring_cap,
            liquidation_ring_cap,
            price_change_threshold_pct,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_symbols_is_a_fatal_error() {
        std::env::remove_var("SYMBOLS");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("SYMBOLS"));
    }

    #[test]
    fn symbols_are_split_trimmed_and_uppercased() {
        std::env::set_var("SYMBOLS", " btcusdt, ethusdt ,");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        std::env::remove_var("SYMBOLS");
    }
}
