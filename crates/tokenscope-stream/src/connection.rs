use crate::lifecycle::{
    CloseDecision, ConnectionMachine, LivenessAction, LivenessSignal, ReconnectPolicy,
    ReconnectTicket, ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokenscope_core::stream_protocol::{
    decode_binary_frame, decode_frame, ControlFrame, DecodedFrame, RawEvent,
    DEFAULT_MAX_FRAME_BYTES, HEARTBEAT_LITERAL,
};
use tokenscope_core::ConnectionStatus;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const MANUAL_DISCONNECT_REASON: &str = "Manual disconnect";

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    /// `None` disables idle detection.
    pub idle_timeout: Option<Duration>,
    pub max_frame_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: Some(DEFAULT_HEARTBEAT_INTERVAL * 3),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Everything the connection reports to its single consumer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status(ConnectionStatus),
    Event(RawEvent),
    Opaque(String),
    TransportError(String),
    Closed { code: u16, reason: String },
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug)]
enum Command {
    Send(String),
    Connect,
    Disconnect,
}

/// Owned handle to a running connection. Clones share the same socket;
/// dropping the last one disconnects and stops the driver task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Fire-and-forget: dropped with a warning unless the socket is open.
    pub async fn send(&self, payload: impl Into<String>) {
        self.command(Command::Send(payload.into())).await;
    }

    pub async fn disconnect(&self) {
        self.command(Command::Disconnect).await;
    }

    pub async fn reconnect(&self) {
        self.command(Command::Connect).await;
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    async fn command(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            warn!(event = "stream_command_dropped", reason = "driver_stopped");
        }
    }
}

/// Starts the connection on the current runtime.
pub fn connect(
    endpoint: Url,
    config: ConnectionConfig,
) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
    let driver = Driver {
        machine: ConnectionMachine::new(config.reconnect),
        endpoint,
        config,
        commands: command_rx,
        events: event_tx,
        status: status_tx,
        detached: false,
    };
    tokio::spawn(driver.run());
    (
        ConnectionHandle {
            commands: command_tx,
            status: status_rx,
        },
        event_rx,
    )
}

enum Step {
    Attempt(u64),
    Wait(ReconnectTicket),
    Idle,
    Shutdown,
}

struct Driver {
    machine: ConnectionMachine,
    endpoint: Url,
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    status: watch::Sender<ConnectionStatus>,
    detached: bool,
}

impl Driver {
    async fn run(mut self) {
        let mut step = match self.machine.request_connect() {
            Some(generation) => Step::Attempt(generation),
            None => Step::Idle,
        };
        loop {
            step = match step {
                Step::Attempt(generation) => self.attempt(generation).await,
                Step::Wait(ticket) => self.wait_reconnect(ticket).await,
                Step::Idle => self.idle().await,
                Step::Shutdown => break,
            };
        }
        debug!(event = "stream_driver_stopped", url = %self.endpoint);
    }

    async fn attempt(&mut self, generation: u64) -> Step {
        info!(
            event = "stream_connecting",
            url = %self.endpoint,
            attempt = self.machine.attempts()
        );
        self.publish_status().await;

        let connecting = connect_async(self.endpoint.to_string());
        tokio::pin!(connecting);
        let mut ws = loop {
            tokio::select! {
                result = &mut connecting => match result {
                    Ok((ws, _)) => break ws,
                    Err(err) => {
                        warn!(event = "stream_connect_error", url = %self.endpoint, error = %err);
                        self.machine.on_transport_error();
                        self.emit(ConnectionEvent::TransportError(err.to_string())).await;
                        return self.handle_close(ABNORMAL_CLOSURE, err.to_string()).await;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        warn!(event = "stream_send_dropped", reason = "not_open");
                    }
                    Some(Command::Connect) => {
                        debug!(event = "stream_connect_suppressed", reason = "connecting");
                    }
                    Some(Command::Disconnect) => {
                        self.machine.disconnect();
                        return self
                            .handle_close(NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON.to_string())
                            .await;
                    }
                    None => {
                        self.detached = true;
                        self.machine.disconnect();
                        return self
                            .handle_close(NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON.to_string())
                            .await;
                    }
                },
            }
        };

        self.machine.on_open();
        info!(event = "stream_open", url = %self.endpoint);
        self.publish_status().await;
        let (code, reason) = self.run_session(&mut ws, generation).await;
        self.handle_close(code, reason).await
    }

    async fn run_session(&mut self, ws: &mut Socket, generation: u64) -> (u16, String) {
        let every = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            let idle_deadline = self.config.idle_timeout.map(|idle| last_inbound + idle);
            tokio::select! {
                message = ws.next() => match message {
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        if let Some(closed) = self.handle_message(ws, message).await {
                            return closed;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(event = "stream_read_error", error = %err);
                        self.machine.on_transport_error();
                        self.emit(ConnectionEvent::TransportError(err.to_string())).await;
                        return (ABNORMAL_CLOSURE, err.to_string());
                    }
                    None => return (ABNORMAL_CLOSURE, "stream ended".to_string()),
                },
                _ = heartbeat.tick() => {
                    if self.machine.heartbeat_due(generation) {
                        debug!(event = "stream_heartbeat_sent");
                        if let Err(err) = ws.send(Message::Text(HEARTBEAT_LITERAL.to_string())).await {
                            warn!(event = "stream_write_error", error = %err);
                            self.machine.on_transport_error();
                            self.emit(ConnectionEvent::TransportError(err.to_string())).await;
                            return (ABNORMAL_CLOSURE, err.to_string());
                        }
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline.unwrap_or_else(Instant::now)), if idle_deadline.is_some() => {
                    warn!(
                        event = "stream_idle_timeout",
                        idle_ms = self.config.idle_timeout.map(|idle| idle.as_millis() as u64)
                    );
                    return (ABNORMAL_CLOSURE, "idle timeout".to_string());
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(payload)) => {
                        if !self.machine.can_send() {
                            warn!(event = "stream_send_dropped", reason = "not_open");
                            continue;
                        }
                        if let Err(err) = ws.send(Message::Text(payload)).await {
                            warn!(event = "stream_write_error", error = %err);
                            self.machine.on_transport_error();
                            self.emit(ConnectionEvent::TransportError(err.to_string())).await;
                            return (ABNORMAL_CLOSURE, err.to_string());
                        }
                    }
                    Some(Command::Connect) => {
                        debug!(event = "stream_connect_suppressed", reason = "open");
                    }
                    Some(Command::Disconnect) => {
                        self.machine.disconnect();
                        return close_gracefully(ws).await;
                    }
                    None => {
                        self.detached = true;
                        self.machine.disconnect();
                        return close_gracefully(ws).await;
                    }
                },
            }
        }
    }

    /// Returns the close code and reason when the peer closed the socket.
    async fn handle_message(&mut self, ws: &mut Socket, message: Message) -> Option<(u16, String)> {
        let decoded = match message {
            Message::Text(text) => decode_frame(&text, self.config.max_frame_bytes),
            Message::Binary(bytes) => decode_binary_frame(&bytes, self.config.max_frame_bytes),
            Message::Close(frame) => {
                let (code, reason) = match frame {
                    Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                    None => (NO_STATUS_RECEIVED, String::new()),
                };
                if let Err(err) = ws.close(None).await {
                    debug!(event = "stream_close_error", error = %err);
                }
                return Some((code, reason));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
        };
        match decoded {
            Ok(DecodedFrame::Control(control)) => {
                if let Err(err) = self.answer_control(ws, control).await {
                    warn!(event = "stream_write_error", error = %err);
                }
            }
            Ok(DecodedFrame::Event(raw)) => {
                debug!(event = "stream_event", kind = %raw.kind);
                self.emit(ConnectionEvent::Event(raw)).await;
            }
            Ok(DecodedFrame::Opaque(text)) => {
                debug!(event = "stream_opaque_frame", len = text.len());
                self.emit(ConnectionEvent::Opaque(text)).await;
            }
            Err(err) => {
                warn!(event = "stream_decode_error", error = %err);
            }
        }
        None
    }

    async fn answer_control(
        &mut self,
        ws: &mut Socket,
        control: ControlFrame,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let signal = match control {
            ControlFrame::LivenessProbe { literal: true } => LivenessSignal::LiteralHeartbeat,
            ControlFrame::LivenessProbe { literal: false } => LivenessSignal::PeerProbe,
            ControlFrame::LivenessResponse | ControlFrame::Pong => LivenessSignal::Response,
            ControlFrame::ConnectionAck { status } => {
                info!(event = "stream_ack", status = status.as_deref().unwrap_or("unknown"));
                return Ok(());
            }
        };
        match self.machine.on_liveness(signal) {
            LivenessAction::Echo => {
                debug!(event = "stream_heartbeat_echo");
                ws.send(Message::Text(HEARTBEAT_LITERAL.to_string())).await
            }
            LivenessAction::Acknowledged => {
                debug!(event = "stream_heartbeat_ack");
                Ok(())
            }
        }
    }

    async fn wait_reconnect(&mut self, ticket: ReconnectTicket) -> Step {
        let delay = tokio::time::sleep(ticket.delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => {
                    return match self.machine.on_reconnect_due(ticket) {
                        Some(generation) => Step::Attempt(generation),
                        None => self.settle(),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        warn!(event = "stream_send_dropped", reason = "not_open");
                    }
                    Some(Command::Connect) => {
                        if let Some(generation) = self.machine.request_connect() {
                            return Step::Attempt(generation);
                        }
                    }
                    Some(Command::Disconnect) => {
                        self.machine.disconnect();
                        info!(event = "stream_reconnect_cancelled", attempt = ticket.attempt);
                        self.publish_status().await;
                        return Step::Idle;
                    }
                    None => {
                        self.machine.disconnect();
                        return Step::Shutdown;
                    }
                },
            }
        }
    }

    async fn idle(&mut self) -> Step {
        loop {
            match self.commands.recv().await {
                Some(Command::Send(_)) => {
                    warn!(event = "stream_send_dropped", reason = "not_open");
                }
                Some(Command::Connect) => {
                    if let Some(generation) = self.machine.request_connect() {
                        return Step::Attempt(generation);
                    }
                }
                Some(Command::Disconnect) => {
                    self.machine.disconnect();
                }
                None => return Step::Shutdown,
            }
        }
    }

    async fn handle_close(&mut self, code: u16, reason: String) -> Step {
        let decision = self.machine.on_close(code);
        info!(event = "stream_closed", code, reason = %reason);
        self.emit(ConnectionEvent::Closed { code, reason }).await;
        self.publish_status().await;
        match decision {
            CloseDecision::Reconnect(ticket) => {
                info!(
                    event = "stream_reconnect_scheduled",
                    attempt = ticket.attempt,
                    delay_ms = ticket.delay.as_millis() as u64
                );
                Step::Wait(ticket)
            }
            CloseDecision::Exhausted { attempts } => {
                error!(event = "stream_retries_exhausted", attempts);
                self.emit(ConnectionEvent::RetriesExhausted { attempts }).await;
                self.settle()
            }
            CloseDecision::Stop(reason) => {
                info!(event = "stream_stopped", reason = ?reason);
                self.settle()
            }
        }
    }

    fn settle(&self) -> Step {
        if self.detached {
            Step::Shutdown
        } else {
            Step::Idle
        }
    }

    async fn publish_status(&mut self) {
        let status = self.machine.status();
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            self.emit(ConnectionEvent::Status(status)).await;
        }
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).await.is_err() {
            debug!(event = "stream_consumer_gone");
        }
    }
}

async fn close_gracefully(ws: &mut Socket) -> (u16, String) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: Cow::Borrowed(MANUAL_DISCONNECT_REASON),
    };
    if let Err(err) = ws.close(Some(frame)).await {
        debug!(event = "stream_close_error", error = %err);
    }
    let drained = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    if drained.is_err() {
        debug!(event = "stream_close_drain_timeout");
    }
    (NORMAL_CLOSURE, MANUAL_DISCONNECT_REASON.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_timings() {
        let config = ConnectionConfig::default();
        assert_eq!(config.reconnect.interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(90)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_every_handle_stops_the_driver() {
        let endpoint = Url::parse("ws://127.0.0.1:9/ws").expect("url");
        let config = ConnectionConfig {
            reconnect: ReconnectPolicy {
                interval: Duration::from_secs(60),
                max_attempts: 1,
            },
            ..ConnectionConfig::default()
        };
        let (handle, mut events) = connect(endpoint, config);
        drop(handle);
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "driver kept running after handles dropped");
    }
}
