use crate::connection::ConnectionEvent;
use serde::Serialize;
use tokenscope_core::{
    BoardStats, BoardView, ConnectionStatus, DispatchCounters, EventDispatcher, ReplacePolicy,
    TokenBoard, TokenRecord,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// What consumers see after every change.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub connection: ConnectionStatus,
    pub retries_exhausted: bool,
    pub stats: BoardStats,
    pub tokens: Vec<TokenRecord>,
}

/// The single consumer of a connection's events. Sole owner of the board.
pub struct Dashboard {
    board: TokenBoard,
    dispatcher: EventDispatcher,
    connection: ConnectionStatus,
    retries_exhausted: bool,
    snapshots: watch::Sender<DashboardSnapshot>,
}

impl Dashboard {
    pub fn new(policy: ReplacePolicy) -> (Self, watch::Receiver<DashboardSnapshot>) {
        let (snapshots, rx) = watch::channel(DashboardSnapshot::default());
        (
            Self {
                board: TokenBoard::new(policy),
                dispatcher: EventDispatcher::new(),
                connection: ConnectionStatus::Disconnected,
                retries_exhausted: false,
                snapshots,
            },
            rx,
        )
    }

    pub fn board(&self) -> &TokenBoard {
        &self.board
    }

    pub fn counters(&self) -> DispatchCounters {
        self.dispatcher.counters()
    }

    /// Folds one connection event in. True when consumers need a new snapshot.
    pub fn apply(&mut self, event: ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Status(status) => {
                if matches!(status, ConnectionStatus::Connecting | ConnectionStatus::Connected) {
                    self.retries_exhausted = false;
                }
                let changed = self.connection != status;
                self.connection = status;
                changed
            }
            ConnectionEvent::Event(raw) => self.dispatcher.dispatch(&mut self.board, raw).changed(),
            ConnectionEvent::Opaque(text) => {
                self.dispatcher.dispatch_opaque(&text);
                false
            }
            ConnectionEvent::TransportError(message) => {
                warn!(event = "dashboard_transport_error", error = %message);
                false
            }
            ConnectionEvent::Closed { code, reason } => {
                debug!(event = "dashboard_connection_closed", code, reason = %reason);
                false
            }
            ConnectionEvent::RetriesExhausted { attempts } => {
                warn!(event = "dashboard_retries_exhausted", attempts);
                let changed = !self.retries_exhausted;
                self.retries_exhausted = true;
                changed
            }
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let view = BoardView::project(&self.board);
        DashboardSnapshot {
            connection: self.connection,
            retries_exhausted: self.retries_exhausted,
            stats: view.stats,
            tokens: view.tokens,
        }
    }

    /// Consumes events until the connection driver stops.
    pub async fn run(mut self, mut events: mpsc::Receiver<ConnectionEvent>) -> Self {
        while let Some(event) = events.recv().await {
            if self.apply(event) {
                self.snapshots.send_replace(self.snapshot());
            }
        }
        debug!(event = "dashboard_stopped", tokens = self.board.len());
        self
    }
}
