use std::time::Duration;
use tokenscope_core::ConnectionStatus;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Fixed-interval retry, bounded by `max_attempts` reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// A scheduled reconnect. Only honoured if `generation` is still current
/// when the delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTicket {
    pub generation: u64,
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ManualDisconnect,
    NormalClosure,
    RetriesExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    Reconnect(ReconnectTicket),
    /// Returned once, on the close that used up the last attempt.
    Exhausted { attempts: u32 },
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessSignal {
    /// Bare `heartbeat` text: either the peer's answer or its own probe.
    LiteralHeartbeat,
    PeerProbe,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    Echo,
    Acknowledged,
}

/// Transport-free connection lifecycle. The async driver feeds it transport
/// outcomes and does whatever it decides.
#[derive(Debug)]
pub struct ConnectionMachine {
    policy: ReconnectPolicy,
    phase: Phase,
    attempts: u32,
    manual_close: bool,
    generation: u64,
    exhausted: bool,
    probe_outstanding: bool,
    errored: bool,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            phase: Phase::Idle,
            attempts: 0,
            manual_close: false,
            generation: 0,
            exhausted: false,
            probe_outstanding: false,
            errored: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_manual_close(&self) -> bool {
        self.manual_close
    }

    pub fn probe_outstanding(&self) -> bool {
        self.probe_outstanding
    }

    /// Caller-initiated connect. Returns the generation of the new attempt,
    /// or `None` when a socket is already connecting or open.
    pub fn request_connect(&mut self) -> Option<u64> {
        if matches!(self.phase, Phase::Connecting | Phase::Open) {
            return None;
        }
        self.manual_close = false;
        self.attempts = 0;
        self.exhausted = false;
        Some(self.begin())
    }

    pub fn on_open(&mut self) {
        self.phase = Phase::Open;
        self.attempts = 0;
        self.exhausted = false;
        self.errored = false;
        self.probe_outstanding = false;
    }

    /// Errors only change the reported status; the close that follows
    /// decides about reconnecting.
    pub fn on_transport_error(&mut self) {
        self.errored = true;
    }

    pub fn on_close(&mut self, code: u16) -> CloseDecision {
        self.phase = Phase::Closed;
        self.probe_outstanding = false;
        if self.manual_close {
            return CloseDecision::Stop(StopReason::ManualDisconnect);
        }
        if code == NORMAL_CLOSURE {
            return CloseDecision::Stop(StopReason::NormalClosure);
        }
        if self.exhausted {
            return CloseDecision::Stop(StopReason::RetriesExhausted);
        }
        if self.attempts >= self.policy.max_attempts {
            self.exhausted = true;
            return CloseDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        CloseDecision::Reconnect(ReconnectTicket {
            generation: self.generation,
            attempt: self.attempts + 1,
            delay: self.policy.interval,
        })
    }

    /// Timer callback for a scheduled reconnect. Stale tickets are no-ops.
    pub fn on_reconnect_due(&mut self, ticket: ReconnectTicket) -> Option<u64> {
        if self.manual_close
            || self.exhausted
            || ticket.generation != self.generation
            || self.phase != Phase::Closed
        {
            return None;
        }
        self.attempts += 1;
        Some(self.begin())
    }

    /// Sets the manual-close flag and invalidates every pending timer.
    /// Returns true if a socket is connecting or open and must be closed.
    pub fn disconnect(&mut self) -> bool {
        self.manual_close = true;
        self.generation += 1;
        self.probe_outstanding = false;
        matches!(self.phase, Phase::Connecting | Phase::Open)
    }

    /// Heartbeat timer callback. True means send a probe now.
    pub fn heartbeat_due(&mut self, generation: u64) -> bool {
        if self.phase != Phase::Open || self.manual_close || generation != self.generation {
            return false;
        }
        self.probe_outstanding = true;
        true
    }

    pub fn on_liveness(&mut self, signal: LivenessSignal) -> LivenessAction {
        match signal {
            LivenessSignal::LiteralHeartbeat if self.probe_outstanding => {
                self.probe_outstanding = false;
                LivenessAction::Acknowledged
            }
            LivenessSignal::LiteralHeartbeat | LivenessSignal::PeerProbe => LivenessAction::Echo,
            LivenessSignal::Response => {
                self.probe_outstanding = false;
                LivenessAction::Acknowledged
            }
        }
    }

    pub fn can_send(&self) -> bool {
        self.phase == Phase::Open && !self.manual_close
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.phase {
            Phase::Open => ConnectionStatus::Connected,
            Phase::Connecting => ConnectionStatus::Connecting,
            Phase::Idle | Phase::Closed if self.errored => ConnectionStatus::Error,
            Phase::Idle | Phase::Closed => ConnectionStatus::Disconnected,
        }
    }

    fn begin(&mut self) -> u64 {
        self.phase = Phase::Connecting;
        self.errored = false;
        self.probe_outstanding = false;
        self.generation += 1;
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max_attempts: u32) -> ConnectionMachine {
        ConnectionMachine::new(ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts,
        })
    }

    fn open(machine: &mut ConnectionMachine) -> u64 {
        let generation = machine.request_connect().expect("connect");
        machine.on_open();
        generation
    }

    #[test]
    fn abnormal_close_schedules_fixed_interval_reconnect() {
        let mut m = machine(10);
        open(&mut m);
        let CloseDecision::Reconnect(ticket) = m.on_close(ABNORMAL_CLOSURE) else {
            panic!("expected reconnect");
        };
        assert_eq!(ticket.attempt, 1);
        assert_eq!(ticket.delay, Duration::from_millis(10));
        assert_eq!(m.status(), ConnectionStatus::Disconnected);
        assert!(m.on_reconnect_due(ticket).is_some());
        assert_eq!(m.attempts(), 1);
        assert_eq!(m.status(), ConnectionStatus::Connecting);

        m.on_open();
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn manual_disconnect_suppresses_reconnect_for_any_code() {
        let mut m = machine(10);
        open(&mut m);
        assert!(m.disconnect());
        assert!(m.is_manual_close());
        for code in [ABNORMAL_CLOSURE, NO_STATUS_RECEIVED, 4000, NORMAL_CLOSURE] {
            assert_eq!(
                m.on_close(code),
                CloseDecision::Stop(StopReason::ManualDisconnect)
            );
        }
        assert!(!m.can_send());
    }

    #[test]
    fn timers_firing_after_disconnect_are_no_ops() {
        let mut m = machine(10);
        let generation = open(&mut m);
        let CloseDecision::Reconnect(ticket) = m.on_close(ABNORMAL_CLOSURE) else {
            panic!("expected reconnect");
        };
        assert!(!m.disconnect());
        assert_eq!(m.on_reconnect_due(ticket), None);
        assert!(!m.heartbeat_due(generation));
        assert_eq!(m.phase(), Phase::Closed);
    }

    #[test]
    fn normal_closure_does_not_reconnect() {
        let mut m = machine(10);
        open(&mut m);
        assert_eq!(
            m.on_close(NORMAL_CLOSURE),
            CloseDecision::Stop(StopReason::NormalClosure)
        );
    }

    #[test]
    fn reconnect_is_bounded_and_exhaustion_fires_once() {
        let mut m = machine(3);
        m.request_connect().expect("connect");
        let mut exhausted = 0;
        let mut scheduled = 0;
        for _ in 0..10 {
            match m.on_close(ABNORMAL_CLOSURE) {
                CloseDecision::Reconnect(ticket) => {
                    scheduled += 1;
                    m.on_reconnect_due(ticket).expect("attempt");
                }
                CloseDecision::Exhausted { attempts } => {
                    exhausted += 1;
                    assert_eq!(attempts, 3);
                }
                CloseDecision::Stop(reason) => {
                    assert_eq!(reason, StopReason::RetriesExhausted);
                }
            }
        }
        assert_eq!(scheduled, 3);
        assert_eq!(exhausted, 1);
        assert!(m.is_exhausted());
    }

    #[test]
    fn caller_connect_clears_exhaustion() {
        let mut m = machine(0);
        m.request_connect().expect("connect");
        assert_eq!(m.on_close(ABNORMAL_CLOSURE), CloseDecision::Exhausted { attempts: 0 });
        assert!(m.request_connect().is_some());
        assert!(!m.is_exhausted());
        assert!(!m.is_manual_close());
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn stale_ticket_from_earlier_session_is_ignored() {
        let mut m = machine(10);
        open(&mut m);
        let CloseDecision::Reconnect(stale) = m.on_close(ABNORMAL_CLOSURE) else {
            panic!("expected reconnect");
        };
        m.request_connect().expect("connect");
        m.on_transport_error();
        let CloseDecision::Reconnect(_) = m.on_close(ABNORMAL_CLOSURE) else {
            panic!("expected reconnect");
        };
        assert_eq!(m.on_reconnect_due(stale), None);
    }

    #[test]
    fn connect_is_suppressed_while_connecting_or_open() {
        let mut m = machine(10);
        let first = m.request_connect().expect("connect");
        assert_eq!(m.request_connect(), None);
        m.on_open();
        assert_eq!(m.request_connect(), None);
        assert_eq!(m.generation(), first);
    }

    #[test]
    fn transport_error_is_reported_until_next_attempt() {
        let mut m = machine(10);
        m.request_connect().expect("connect");
        m.on_transport_error();
        let CloseDecision::Reconnect(ticket) = m.on_close(ABNORMAL_CLOSURE) else {
            panic!("expected reconnect");
        };
        assert_eq!(m.status(), ConnectionStatus::Error);
        m.on_reconnect_due(ticket).expect("attempt");
        assert_eq!(m.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn own_probe_answered_by_literal_heartbeat_is_not_echoed() {
        let mut m = machine(10);
        let generation = open(&mut m);
        assert_eq!(m.on_liveness(LivenessSignal::LiteralHeartbeat), LivenessAction::Echo);

        assert!(m.heartbeat_due(generation));
        assert!(m.probe_outstanding());
        assert_eq!(
            m.on_liveness(LivenessSignal::LiteralHeartbeat),
            LivenessAction::Acknowledged
        );
        assert_eq!(m.on_liveness(LivenessSignal::LiteralHeartbeat), LivenessAction::Echo);

        assert!(m.heartbeat_due(generation));
        assert_eq!(m.on_liveness(LivenessSignal::PeerProbe), LivenessAction::Echo);
        assert_eq!(m.on_liveness(LivenessSignal::Response), LivenessAction::Acknowledged);
        assert!(!m.probe_outstanding());
    }
}
