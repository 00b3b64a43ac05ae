//! Upstream adapter: owns one combined-stream connection (spot or futures),
//! decodes frames through `codec`, and feeds the result into the shared
//! cache + Hub pipeline.
//!
//! Structured as an explicit state machine with a dedicated backoff step,
//! simplified to the one fixed-step policy this service actually needs:
//! reconnect after 5s, then every 10s, with no endpoint rotation or
//! circuit breaker.

pub mod url;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::codec;
use crate::metrics;
use crate::tick::Symbol;
pub use url::Market;

use crate::pipeline::Pipeline;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const RECONNECT_INITIAL: Duration = Duration::from_secs(5);
const RECONNECT_SUBSEQUENT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct AdapterConfig {
    pub base_url: String,
    pub intervals: Vec<String>,
}

/// Why a connected session ended; decides whether the next attempt waits
/// out the backoff step or reconnects immediately.
enum SessionEnd {
    /// The caller (symbol list changed) tore the connection down on purpose.
    Restarted,
    /// The remote end closed the stream or the socket errored.
    Lost,
}

pub struct UpstreamAdapter {
    market: Market,
    config: AdapterConfig,
    symbols: RwLock<Vec<Symbol>>,
    running: AtomicBool,
    state: RwLock<AdapterState>,
    restart: Notify,
    pipeline: Pipeline,
}

impl UpstreamAdapter {
    pub fn new(market: Market, config: AdapterConfig, symbols: Vec<Symbol>, pipeline: Pipeline) -> Arc<Self> {
        Arc::new(Self {
            market,
            config,
            symbols: RwLock::new(symbols),
            running: AtomicBool::new(true),
            state: RwLock::new(AdapterState::Disconnected),
            restart: Notify::new(),
            pipeline,
        })
    }

    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    /// Add a symbol if not already tracked, then tear down and re-establish
    /// the connection so the new subscription list takes effect.
    pub fn add_symbol(&self, symbol: Symbol) {
        let mut symbols = self.symbols.write();
        if symbols.iter().any(|s| s == &symbol) {
            return;
        }
        symbols.push(symbol);
        drop(symbols);
        self.restart.notify_one();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.restart.notify_one();
    }

    fn set_state(&self, state: AdapterState) {
        *self.state.write() = state;
    }

    pub async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        while self.running.load(Ordering::SeqCst) {
            self.set_state(AdapterState::Connecting);
            let symbols = self.symbols.read().clone();
            let target = url::build_subscription_url(&self.config.base_url, self.market, &symbols, &self.config.intervals);

            match connect_async(&target).await {
                Ok((ws_stream, _)) => {
                    info!(market = ?self.market, symbols = symbols.len(), "adapter connected");
                    self.set_state(AdapterState::Connected);
                    match self.run_connected(ws_stream).await {
                        SessionEnd::Restarted => {
                            attempt = 0;
                            self.set_state(AdapterState::Disconnected);
                            continue;
                        }
                        SessionEnd::Lost => {
                            self.set_state(AdapterState::Disconnected);
                        }
                    }
                }
                Err(err) => {
                    warn!(market = ?self.market, error = %err, "adapter connect failed");
                    self.set_state(AdapterState::Disconnected);
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            metrics::reconnect();
            let delay = if attempt == 0 { RECONNECT_INITIAL } else { RECONNECT_SUBSEQUENT };
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_connected<S>(&self, ws_stream: tokio_tungstenite::WebSocketStream<S>) -> SessionEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = ws_stream.split();
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        ping_timer.tick().await; // first tick fires immediately; consume it
        let mut deadline = Instant::now() + READ_TIMEOUT;

        loop {
            tokio::select! {
                _ = self.restart.notified() => {
                    if !self.running.load(Ordering::SeqCst) {
                        let _ = write.close().await;
                        return SessionEnd::Lost;
                    }
                    info!(market = ?self.market, "restarting connection for symbol list change");
                    let _ = write.close().await;
                    return SessionEnd::Restarted;
                }
                _ = ping_timer.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(market = ?self.market, "no read activity within timeout, treating as a lost connection");
                    return SessionEnd::Lost;
                }
                msg = read.next() => {
                    deadline = Instant::now() + READ_TIMEOUT;
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.ingest_frame(&text);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            info!(market = ?self.market, "upstream closed the connection");
                            return SessionEnd::Lost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(market = ?self.market, error = %err, "websocket read error");
                            return SessionEnd::Lost;
                        }
                        None => {
                            info!(market = ?self.market, "upstream stream ended");
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    fn ingest_frame(&self, text: &str) {
        match codec::decode(text) {
            Ok(ticks) => {
                for tick in ticks {
                    self.pipeline.ingest(tick);
                }
            }
            Err(err) => {
                metrics::decode_error();
                warn!(market = ?self.market, error = %err, "dropping undecodable frame");
            }
        }
    }
}
