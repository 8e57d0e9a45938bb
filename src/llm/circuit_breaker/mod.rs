
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Outcome of asking the breaker for permission to call the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single half-open trial call
    Probe,
    Rejected,
}

/// Per-provider breaker: `closed` until `failure_threshold` consecutive failures,
/// `open` for `cooldown`, then `half-open` with one probe in flight at a time.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_transition: DateTime<Utc>,
}

impl CircuitBreaker {
    #[inline]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            opened_at: None,
            probe_in_flight: false,
            last_transition: Utc::now(),
        }
    }

    #[inline]
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = self
                    .opened_at
                    .is_none_or(|opened| now.saturating_duration_since(opened) >= self.cooldown);
                if cooled_down {
                    info!("Circuit half-open after {:?} cool-down", self.cooldown);
                    self.transition(CircuitState::HalfOpen);
                    self.probe_in_flight = true;
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if self.probe_in_flight => Admission::Rejected,
            CircuitState::HalfOpen => {
                self.probe_in_flight = true;
                Admission::Probe
            }
        }
    }

    #[inline]
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        self.opened_at = None;
        if self.state != CircuitState::Closed {
            info!("Circuit closed after successful probe");
            self.transition(CircuitState::Closed);
        }
    }

    #[inline]
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.probe_in_flight = false;

        match self.state {
            CircuitState::HalfOpen => {
                warn!("Probe failed, circuit re-opened");
                self.open(now);
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.failure_threshold,
                    "Circuit opened"
                );
                self.open(now);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.opened_at = Some(now);
        self.transition(CircuitState::Open);
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition = Utc::now();
    }

    #[inline]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    #[inline]
    pub fn last_transition(&self) -> DateTime<Utc> {
        self.last_transition
    }

    /// Zero unless open, otherwise the time left before a probe is admitted
    #[inline]
    pub fn remaining_cooldown(&self, now: Instant) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(opened)),
            _ => Duration::ZERO,
        }
    }
}
