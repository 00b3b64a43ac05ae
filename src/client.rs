//! Client session: one WebSocket connection, multiplexing a read pump and a
//! write pump over a single task via `tokio::select!`, the same shape
//! `adapter::run_connected` uses for its own ping/read loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::supervisor::Supervisor;
use crate::wire::{ClientRequest, ServerEvent};

const MAX_MESSAGE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl ClientConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            pong_wait: Duration::from_secs(config.pong_wait_secs),
            ping_period: Duration::from_secs(config.ping_period_secs),
            write_wait: Duration::from_secs(config.write_wait_secs),
        }
    }
}

fn random_client_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drain every frame already queued behind `first` and join them with `\n`
/// into a single text frame, so a burst of updates costs one write instead
/// of one per frame.
fn batch_queued_frames(first: crate::hub::Frame, rx: &mut tokio::sync::mpsc::Receiver<crate::hub::Frame>) -> String {
    let mut batch = first.to_string();
    while let Ok(next) = rx.try_recv() {
        batch.push('\n');
        batch.push_str(&next);
    }
    batch
}

pub async fn handle_socket(socket: WebSocket, supervisor: Arc<Supervisor>, config: ClientConfig) {
    let id = random_client_id();
    info!(client_id = %id, "client connected");

    let mut rx = supervisor.hub().register(id.clone()).await;
    let (mut sink, mut stream) = socket.split();
    let mut ping_timer = tokio::time::interval(config.ping_period);
    ping_timer.tick().await;
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(f) => {
                        let batch = batch_queued_frames(f, &mut rx);
                        if send_with_deadline(&mut sink, Message::Text(batch), config.write_wait).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        info!(client_id = %id, "send queue closed, ending session");
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if send_with_deadline(&mut sink, Message::Ping(Vec::new()), config.write_wait).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(client_id = %id, "pong wait exceeded, closing session");
                break;
            }
            msg = stream.next() => {
                deadline = Instant::now() + config.pong_wait;
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_request(&id, &text, &supervisor, &mut sink, config.write_wait).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(client_id = %id, error = %err, "client read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    supervisor.hub().unregister(id);
    let _ = sink.close().await;
}

async fn send_with_deadline(
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    message: Message,
    write_wait: Duration,
) -> Result<(), ()> {
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

async fn handle_request(
    id: &str,
    text: &str,
    supervisor: &Arc<Supervisor>,
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    write_wait: Duration,
) {
    if text.len() > MAX_MESSAGE_SIZE {
        reply(sink, write_wait, ServerEvent::Error { message: "message exceeds maximum size".into() }).await;
        return;
    }

    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(_) => {
            reply(sink, write_wait, ServerEvent::Error { message: "invalid request".into() }).await;
            return;
        }
    };

    match request {
        ClientRequest::Subscribe { symbol } => {
            let symbol = symbol.to_ascii_uppercase();
            supervisor.hub().subscribe(id.to_string(), symbol.clone()).await;
            reply(sink, write_wait, ServerEvent::Subscribed { symbol }).await;
        }
        ClientRequest::Unsubscribe { symbol } => {
            let symbol = symbol.to_ascii_uppercase();
            supervisor.hub().unsubscribe(id.to_string(), symbol.clone()).await;
            reply(sink, write_wait, ServerEvent::Unsubscribed { symbol }).await;
        }
        ClientRequest::Ping => {
            reply(sink, write_wait, ServerEvent::Pong { timestamp: now_ms() }).await;
        }
        ClientRequest::GetStats => {
            let stats = supervisor.hub().client_stats(id.to_string()).await;
            reply(
                sink,
                write_wait,
                ServerEvent::Stats {
                    client_count: stats.client_count,
                    subscribed_symbols: stats.subscribed_symbols,
                },
            )
            .await;
        }
    }
}

async fn reply(sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin), write_wait: Duration, event: ServerEvent) {
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = send_with_deadline(sink, Message::Text(json), write_wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_frames_are_batched_into_one_newline_joined_text_frame() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<crate::hub::Frame>(8);
        tx.send(Arc::from(r#"{"type":"price_update","symbol":"BTCUSDT","price":1}"#)).await.unwrap();
        tx.send(Arc::from(r#"{"type":"price_update","symbol":"BTCUSDT","price":2}"#)).await.unwrap();
        tx.send(Arc::from(r#"{"type":"price_update","symbol":"BTCUSDT","price":3}"#)).await.unwrap();

        let first = rx.recv().await.unwrap();
        let batch = batch_queued_frames(first, &mut rx);

        let parts: Vec<&str> = batch.split('\n').collect();
        assert_eq!(parts.len(), 3);
        for part in &parts {
            let _: serde_json::Value = serde_json::from_str(part).expect("each part must be valid JSON");
        }
        assert!(parts[0].contains("\"price\":1"));
        assert!(parts[2].contains("\"price\":3"));
    }

    #[tokio::test]
    async fn a_single_queued_frame_is_sent_unbatched() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<crate::hub::Frame>(8);
        tx.send(Arc::from("only-frame")).await.unwrap();

        let first = rx.recv().await.unwrap();
        let batch = batch_queued_frames(first, &mut rx);
        assert_eq!(batch, "only-frame");
    }
}
