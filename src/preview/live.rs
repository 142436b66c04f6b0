use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

const CHANNEL_CAPACITY: usize = 64;

/// Event pushed to every viewer after a publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Reload {
        branch: String,
        url: String,
        timestamp: String,
    },
}

/// Fan-out of reload events to connected viewers. Late subscribers only
/// see events sent after they connect.
#[derive(Debug, Clone)]
pub struct LiveReload {
    tx: broadcast::Sender<String>,
}

impl Default for LiveReload {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveReload {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Notify every open connection that `branch` was republished.
    /// Returns how many connections the event was queued for.
    pub fn broadcast(&self, branch: &str, url: &str) -> usize {
        let event = LiveEvent::Reload {
            branch: branch.to_string(),
            url: url.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        match serde_json::to_string(&event) {
            Ok(json) => {
                let reached = self.tx.send(json).unwrap_or(0);
                tracing::debug!(%branch, clients = reached, "live reload broadcast");
                reached
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize live reload event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Accept a viewer connection.
    pub fn upgrade(&self, ws: WebSocketUpgrade) -> Response {
        let rx = self.subscribe();
        ws.on_upgrade(move |socket| handle_socket(socket, rx))
    }
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx).await;
    tracing::debug!("live reload viewer disconnected");
}

/// Forward broadcasts to one viewer until it closes, errors, or stops
/// answering pings.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "live reload viewer lagged");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
