use crate::board::{MergeOutcome, TokenBoard};
use crate::events::{DispatchError, EventKind, TokenEvent};
use crate::stream_protocol::RawEvent;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const REJECTED_RING_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DispatchCounters {
    pub applied: u64,
    pub dropped_unknown: u64,
    pub dropped_malformed: u64,
    pub dropped_missing: u64,
    pub opaque: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEvent {
    pub raw: RawEvent,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Merged(MergeOutcome),
    UnknownKind,
    Malformed(DispatchError),
}

impl DispatchOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, DispatchOutcome::Merged(outcome) if outcome.changed())
    }
}

/// Routes decoded events by kind into the board. Never panics on payload
/// shape: rejected events land in a bounded ring for inspection.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    counters: DispatchCounters,
    rejected: VecDeque<RejectedEvent>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, board: &mut TokenBoard, raw: RawEvent) -> DispatchOutcome {
        let Some(kind) = EventKind::from_wire(&raw.kind) else {
            info!(event = "dispatch_unknown_kind", kind = %raw.kind);
            self.counters.dropped_unknown += 1;
            let reason = DispatchError::UnknownKind(raw.kind.clone()).to_string();
            self.remember(raw, reason);
            return DispatchOutcome::UnknownKind;
        };

        let parsed = match TokenEvent::parse(kind, &raw.data) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    event = "dispatch_malformed",
                    kind = kind.as_str(),
                    error = %err,
                    data = %raw.data
                );
                self.counters.dropped_malformed += 1;
                self.remember(raw, err.to_string());
                return DispatchOutcome::Malformed(err);
            }
        };

        let mint = parsed.mint().to_string();
        let outcome = board.apply(parsed);
        if outcome.changed() {
            self.counters.applied += 1;
            debug!(
                event = "dispatch_applied",
                kind = kind.as_str(),
                mint = %mint,
                outcome = ?outcome
            );
        } else {
            self.counters.dropped_missing += 1;
            info!(event = "dispatch_unknown_token", kind = kind.as_str(), mint = %mint);
        }
        DispatchOutcome::Merged(outcome)
    }

    /// Non-JSON text that reached the dispatcher. Counted, never applied.
    pub fn dispatch_opaque(&mut self, text: &str) {
        self.counters.opaque += 1;
        debug!(event = "dispatch_opaque", len = text.len());
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    pub fn rejected(&self) -> impl Iterator<Item = &RejectedEvent> {
        self.rejected.iter()
    }

    fn remember(&mut self, raw: RawEvent, reason: String) {
        if self.rejected.len() == REJECTED_RING_CAPACITY {
            self.rejected.pop_front();
        }
        self.rejected.push_back(RejectedEvent { raw, reason });
    }
}
