//! Demo backend for the token analysis stream: one `/ws` endpoint that fans
//! published events out to every connected dashboard.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::{
    future::Future,
    io,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokenscope_core::stream_protocol::{
    StreamEnvelope, HEARTBEAT_LITERAL, KIND_CONNECTION_STATUS, KIND_HEARTBEAT,
    KIND_HEARTBEAT_RESPONSE, PING_LITERAL, PONG_LITERAL,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod demo;

pub const DEFAULT_IDLE_HEARTBEAT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Silence from a client after which the server probes it.
    pub idle_heartbeat: Duration,
    pub queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            idle_heartbeat: DEFAULT_IDLE_HEARTBEAT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
enum Outbound {
    Frame(String),
    /// Drop every socket without a closing handshake.
    Drop,
    Close(u16),
}

struct FeedInner {
    config: FeedConfig,
    outbound: broadcast::Sender<Outbound>,
    clients: AtomicUsize,
    accepted: AtomicU64,
    heartbeats: AtomicU64,
}

#[derive(Clone)]
pub struct FeedState {
    inner: Arc<FeedInner>,
}

impl FeedState {
    pub fn new(config: FeedConfig) -> Self {
        let (outbound, _) = broadcast::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                config,
                outbound,
                clients: AtomicUsize::new(0),
                accepted: AtomicU64::new(0),
                heartbeats: AtomicU64::new(0),
            }),
        }
    }

    /// Broadcasts one event envelope. Returns how many clients were subscribed.
    pub fn publish(&self, kind: &str, data: Value) -> usize {
        match StreamEnvelope::new(kind, data).encode() {
            Ok(text) => self.publish_raw(text),
            Err(err) => {
                warn!(event = "feed_encode_error", kind, error = %err);
                0
            }
        }
    }

    /// Sends `text` unchanged, for frames that are not well-formed envelopes.
    pub fn publish_raw(&self, text: impl Into<String>) -> usize {
        self.inner
            .outbound
            .send(Outbound::Frame(text.into()))
            .unwrap_or(0)
    }

    pub fn drop_clients(&self) {
        let _ = self.inner.outbound.send(Outbound::Drop);
    }

    /// Closes every socket with a close frame carrying `code`.
    pub fn close_clients(&self, code: u16) {
        let _ = self.inner.outbound.send(Outbound::Close(code));
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.load(Ordering::SeqCst)
    }

    pub fn connections_accepted(&self) -> u64 {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    pub fn heartbeats_received(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    async fn handle_socket(self, mut socket: WebSocket) {
        let mut outbound = self.inner.outbound.subscribe();
        let conn_id = self.inner.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.clients.fetch_add(1, Ordering::SeqCst);
        info!(event = "feed_client_connected", conn_id);

        let ack = envelope(
            KIND_CONNECTION_STATUS,
            json!({"status": "connected", "message": "stream ready"}),
        );
        if socket.send(Message::Text(ack)).await.is_ok() {
            self.pump(&mut socket, &mut outbound, conn_id).await;
        }

        self.inner.clients.fetch_sub(1, Ordering::SeqCst);
        info!(event = "feed_client_disconnected", conn_id);
    }

    async fn pump(
        &self,
        socket: &mut WebSocket,
        outbound: &mut broadcast::Receiver<Outbound>,
        conn_id: u64,
    ) {
        let idle = self.inner.config.idle_heartbeat;
        let mut last_inbound = Instant::now();
        loop {
            tokio::select! {
                message = socket.recv() => match message {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        let reply = match text.trim() {
                            PING_LITERAL => Some(PONG_LITERAL.to_string()),
                            HEARTBEAT_LITERAL => {
                                self.inner.heartbeats.fetch_add(1, Ordering::SeqCst);
                                Some(envelope(KIND_HEARTBEAT_RESPONSE, json!({})))
                            }
                            other => {
                                debug!(event = "feed_client_text", conn_id, len = other.len());
                                None
                            }
                        };
                        if let Some(reply) = reply {
                            if socket.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => last_inbound = Instant::now(),
                    Some(Err(err)) => {
                        debug!(event = "feed_client_error", conn_id, error = %err);
                        return;
                    }
                },
                _ = tokio::time::sleep_until(last_inbound + idle) => {
                    last_inbound = Instant::now();
                    let probe = envelope(KIND_HEARTBEAT, json!({}));
                    if socket.send(Message::Text(probe)).await.is_err() {
                        return;
                    }
                }
                frame = outbound.recv() => match frame {
                    Ok(Outbound::Frame(text)) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Outbound::Drop) => {
                        info!(event = "feed_client_dropped", conn_id);
                        return;
                    }
                    Ok(Outbound::Close(code)) => {
                        info!(event = "feed_client_closed", conn_id, code);
                        let frame = CloseFrame {
                            code,
                            reason: "feed closing".into(),
                        };
                        if let Err(err) = socket.send(Message::Close(Some(frame))).await {
                            debug!(event = "feed_close_error", conn_id, error = %err);
                        }
                        return;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(event = "feed_client_lagged", conn_id, skipped);
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
    }
}

fn envelope(kind: &str, data: Value) -> String {
    match StreamEnvelope::new(kind, data).encode() {
        Ok(text) => text,
        Err(_) => format!(r#"{{"type":"{kind}","data":{{}}}}"#),
    }
}

pub fn router(state: FeedState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: FeedState, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<FeedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| state.handle_socket(socket))
}
