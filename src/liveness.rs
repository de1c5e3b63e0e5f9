use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Unknown,
    Disconnected,
    Connected,
}

/// Outcome of a keepalive period elapsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeepaliveTick {
    /// Id of the previous keepalive that never got an answer; the caller
    /// releases it from the pending table.
    pub stale_id: Option<u8>,
    /// `Some(false)` when the missed keepalive took a connected link down.
    pub transition: Option<bool>,
}

/// Tracks peer liveness over a connectionless byte stream.
///
/// Transitions are edge-triggered: every method returning `Option<bool>`
/// yields `Some(connected)` only when the state actually changed.
#[derive(Debug)]
pub struct LivenessMonitor {
    state: LinkState,
    awaiting: Option<u8>,
    keepalive_interval: Duration,
    deadline: Duration,
    last_keepalive: Option<Instant>,
    deadline_started: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new(keepalive_interval: Duration, deadline: Duration) -> Self {
        Self {
            state: LinkState::Unknown,
            awaiting: None,
            keepalive_interval,
            deadline,
            last_keepalive: None,
            deadline_started: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn awaiting_keepalive(&self) -> Option<u8> {
        self.awaiting
    }

    pub fn keepalive_due(&self, now: Instant) -> bool {
        self.last_keepalive
            .map_or(true, |last| now.saturating_duration_since(last) >= self.keepalive_interval)
    }

    /// Starts a keepalive period. The caller then attempts to send a new
    /// handshake and reports it through [`keepalive_sent`](Self::keepalive_sent).
    pub fn on_keepalive_tick(&mut self, now: Instant) -> KeepaliveTick {
        self.last_keepalive = Some(now);

        let Some(stale_id) = self.awaiting.take() else {
            return KeepaliveTick::default();
        };

        debug!("Keepalive msg_id={} went unanswered", stale_id);
        let transition = if self.state == LinkState::Connected {
            warn!("Device missed a keepalive");
            self.set_state(LinkState::Disconnected)
        } else {
            None
        };

        KeepaliveTick {
            stale_id: Some(stale_id),
            transition,
        }
    }

    pub fn keepalive_sent(&mut self, msg_id: u8, now: Instant) {
        self.awaiting = Some(msg_id);
        self.request_sent(now);
    }

    /// Any request going out arms the deadline if it is not running.
    pub fn request_sent(&mut self, now: Instant) {
        if self.deadline_started.is_none() {
            self.deadline_started = Some(now);
        }
    }

    pub fn on_handshake_response(&mut self, msg_id: u8, now: Instant) -> Option<bool> {
        if self.awaiting == Some(msg_id) {
            self.awaiting = None;
        }
        self.on_response(now);
        self.set_state(LinkState::Connected)
    }

    /// Any accepted response counts as general responsiveness.
    pub fn on_response(&mut self, now: Instant) {
        self.deadline_started = Some(now);
    }

    pub fn check_deadline(&mut self, now: Instant) -> Option<bool> {
        let started = self.deadline_started?;
        if now.saturating_duration_since(started) < self.deadline {
            return None;
        }

        warn!("No response from device for {:?}", self.deadline);
        self.set_state(LinkState::Disconnected)
    }

    /// Explicit teardown from the caller's side.
    pub fn mark_disconnected(&mut self) -> Option<bool> {
        self.set_state(LinkState::Disconnected)
    }

    fn set_state(&mut self, state: LinkState) -> Option<bool> {
        if state == LinkState::Disconnected {
            self.awaiting = None;
            self.deadline_started = None;
        }
        if self.state == state {
            return None;
        }

        info!("Link state {:?} -> {:?}", self.state, state);
        self.state = state;
        Some(state == LinkState::Connected)
    }
}
