//! The Hub: client registry, per-symbol subscription index, and the
//! only component that writes to the subscription index or to any client's
//! send queue.
//!
//! All registry mutations go through one task fed by an unbounded command
//! channel, eliminating map locks and giving a total order between registry
//! changes and broadcasts (see `DESIGN.md` for why this replaces the
//! `tokio::sync::broadcast`-based single-topic fan-out the rest of this
//! codebase otherwise reaches for): a plain broadcast channel has no
//! per-symbol index and no slow-consumer eviction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::metrics;
use crate::tick::Symbol;

pub type ClientId = String;
/// Ticks are serialized to the wire once per broadcast; clients share the
/// allocation via `Arc<str>` rather than each getting an owned `String`.
pub type Frame = Arc<str>;

/// How many consecutive full-queue events before a client is evicted.
const SLOW_CONSUMER_STRIKES: u8 = 2;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HubStats {
    pub client_count: usize,
    pub subscriptions_by_symbol: HashMap<Symbol, usize>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClientStats {
    pub client_count: usize,
    pub subscribed_symbols: Vec<Symbol>,
}

enum HubCommand {
    Register {
        id: ClientId,
        reply: oneshot::Sender<mpsc::Receiver<Frame>>,
    },
    Unregister {
        id: ClientId,
    },
    Subscribe {
        id: ClientId,
        symbol: Symbol,
        reply: Option<oneshot::Sender<()>>,
    },
    Unsubscribe {
        id: ClientId,
        symbol: Symbol,
        reply: Option<oneshot::Sender<()>>,
    },
    Broadcast {
        symbol: Symbol,
        frame: Frame,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    ClientStats {
        id: ClientId,
        reply: oneshot::Sender<ClientStats>,
    },
}

struct ClientEntry {
    tx: mpsc::Sender<Frame>,
    subscribed: HashSet<Symbol>,
    slow_strikes: u8,
}

struct HubActor {
    send_queue_cap: usize,
    clients: HashMap<ClientId, ClientEntry>,
    index: HashMap<Symbol, HashSet<ClientId>>,
}

impl HubActor {
    fn new(send_queue_cap: usize) -> Self {
        Self {
            send_queue_cap,
            clients: HashMap::new(),
            index: HashMap::new(),
        }
    }

    fn register(&mut self, id: ClientId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.send_queue_cap);
        self.clients.insert(
            id,
            ClientEntry {
                tx,
                subscribed: HashSet::new(),
                slow_strikes: 0,
            },
        );
        rx
    }

    fn unregister(&mut self, id: &str) {
        let Some(entry) = self.clients.remove(id) else {
            return;
        };
        for symbol in entry.subscribed {
            if let Some(set) = self.index.get_mut(&symbol) {
                set.remove(id);
                if set.is_empty() {
                    self.index.remove(&symbol);
                }
            }
        }
        // `entry.tx` is dropped here, closing the send queue exactly once.
    }

    fn subscribe(&mut self, id: &str, symbol: Symbol) {
        let Some(entry) = self.clients.get_mut(id) else {
            return;
        };
        if !entry.subscribed.insert(symbol.clone()) {
            return; // already subscribed: no-op
        }
        self.index.entry(symbol).or_default().insert(id.to_string());
    }

    fn unsubscribe(&mut self, id: &str, symbol: &str) {
        let Some(entry) = self.clients.get_mut(id) else {
            return;
        };
        entry.subscribed.remove(symbol);
        if let Some(set) = self.index.get_mut(symbol) {
            set.remove(id);
            if set.is_empty() {
                self.index.remove(symbol);
            }
        }
    }

    fn broadcast(&mut self, symbol: &str, frame: Frame) {
        let Some(ids) = self.index.get(symbol) else {
            return;
        };
        let mut to_evict = Vec::new();
        for id in ids {
            let Some(entry) = self.clients.get_mut(id) else {
                continue;
            };
            match entry.tx.try_send(frame.clone()) {
                Ok(()) => {
                    entry.slow_strikes = 0;
                    metrics::tick_broadcast();
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.slow_strikes += 1;
                    metrics::slow_consumer_warning();
                    warn!(client_id = %id, strikes = entry.slow_strikes, "client send queue full");
                    if entry.slow_strikes >= SLOW_CONSUMER_STRIKES {
                        to_evict.push(id.clone());
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    to_evict.push(id.clone());
                }
            }
        }
        for id in to_evict {
            metrics::slow_consumer_eviction();
            info!(client_id = %id, "evicting slow consumer");
            self.unregister(&id);
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            client_count: self.clients.len(),
            subscriptions_by_symbol: self
                .index
                .iter()
                .map(|(symbol, ids)| (symbol.clone(), ids.len()))
                .collect(),
        }
    }

    fn client_stats(&self, id: &str) -> ClientStats {
        let subscribed_symbols = self
            .clients
            .get(id)
            .map(|c| c.subscribed.iter().cloned().collect())
            .unwrap_or_default();
        ClientStats {
            client_count: self.clients.len(),
            subscribed_symbols,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = commands.recv().await {
            match cmd {
                HubCommand::Register { id, reply } => {
                    let rx = self.register(id);
                    let _ = reply.send(rx);
                }
                HubCommand::Unregister { id } => self.unregister(&id),
                HubCommand::Subscribe { id, symbol, reply } => {
                    self.subscribe(&id, symbol);
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                }
                HubCommand::Unsubscribe { id, symbol, reply } => {
                    self.unsubscribe(&id, &symbol);
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                }
                HubCommand::Broadcast { symbol, frame } => self.broadcast(&symbol, frame),
                HubCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                HubCommand::ClientStats { id, reply } => {
                    let _ = reply.send(self.client_stats(&id));
                }
            }
        }
    }
}

/// A cheap, cloneable handle to the Hub's single serialization task.
#[derive(Clone)]
pub struct Hub {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Spawn the Hub's actor task and return a handle to it.
    pub fn spawn(send_queue_cap: usize) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actor = HubActor::new(send_queue_cap);
        tokio::spawn(actor.run(cmd_rx));
        Self { cmd_tx }
    }

    pub async fn register(&self, id: ClientId) -> mpsc::Receiver<Frame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(HubCommand::Register { id, reply: reply_tx });
        reply_rx.await.expect("hub actor task died")
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id });
    }

    pub async fn subscribe(&self, id: ClientId, symbol: Symbol) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(HubCommand::Subscribe {
            id,
            symbol,
            reply: Some(reply_tx),
        });
        let _ = reply_rx.await;
    }

    pub async fn unsubscribe(&self, id: ClientId, symbol: Symbol) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(HubCommand::Unsubscribe {
            id,
            symbol,
            reply: Some(reply_tx),
        });
        let _ = reply_rx.await;
    }

    pub fn broadcast(&self, symbol: Symbol, frame: Frame) {
        let _ = self.cmd_tx.send(HubCommand::Broadcast { symbol, frame });
    }

    pub async fn stats(&self) -> HubStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(HubCommand::Stats { reply: reply_tx });
        reply_rx.await.unwrap_or_default()
    }

    pub async fn client_stats(&self, id: ClientId) -> ClientStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.cmd_tx.send(HubCommand::ClientStats { id, reply: reply_tx });
        reply_rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_then_broadcast_delivers_to_subscriber_only() {
        let hub = Hub::spawn(256);
        let mut rx_a = hub.register("a".into()).await;
        let _rx_b = hub.register("b".into()).await;

        hub.subscribe("a".into(), "BTCUSDT".into()).await;
        hub.broadcast("BTCUSDT".into(), Arc::from("tick-1"));

        let got = rx_a.recv().await.unwrap();
        assert_eq!(&*got, "tick-1");

        // "b" never subscribed: nothing waiting for it.
        assert!(_rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn double_subscribe_is_a_no_op() {
        let hub = Hub::spawn(256);
        let mut rx = hub.register("a".into()).await;
        hub.subscribe("a".into(), "ETHUSDT".into()).await;
        hub.subscribe("a".into(), "ETHUSDT".into()).await;
        hub.broadcast("ETHUSDT".into(), Arc::from("only-once"));

        assert_eq!(&*rx.recv().await.unwrap(), "only-once");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = Hub::spawn(256);
        let mut rx = hub.register("a".into()).await;
        hub.subscribe("a".into(), "SOLUSDT".into()).await;
        hub.unsubscribe("a".into(), "SOLUSDT".into()).await;
        hub.broadcast("SOLUSDT".into(), Arc::from("should-not-arrive"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_after_two_consecutive_strikes() {
        let hub = Hub::spawn(1); // capacity 1: second enqueue without draining is "full"
        let rx = hub.register("a".into()).await;
        hub.subscribe("a".into(), "BTCUSDT".into()).await;

        // Never drain `rx`: first broadcast fills the queue, the following
        // ones hit a full queue and accumulate strikes until eviction.
        for i in 0..5 {
            hub.broadcast("BTCUSDT".into(), Arc::from(format!("t{i}").as_str()));
        }

        let stats = hub.stats().await;
        assert_eq!(stats.client_count, 0, "client should have been evicted");
        drop(rx);
    }

    #[tokio::test]
    async fn unregister_removes_client_from_index_and_closes_queue() {
        let hub = Hub::spawn(256);
        let mut rx = hub.register("a".into()).await;
        hub.subscribe("a".into(), "BTCUSDT".into()).await;
        hub.unregister("a".into());

        // Give the actor a tick to process the command.
        tokio::task::yield_now().await;
        let stats = hub.stats().await;
        assert_eq!(stats.client_count, 0);
        assert!(rx.recv().await.is_none(), "queue should be closed");
    }
}
