//! Backend health state machine.
//!
//! # States
//! - Unknown: no outcome recorded yet (selectable)
//! - Probing: first probe in flight (selectable)
//! - Healthy: receives traffic first within its tier
//! - Degraded: failing, still selectable but scored down
//! - Down: excluded from selection
//!
//! # State Transitions
//! ```text
//! Unknown/Probing → Healthy:  first success
//! Healthy → Degraded:         consecutive failures >= degraded_threshold
//! any → Down:                 consecutive failures >= unhealthy_threshold
//! Degraded/Down → Healthy:    consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping: one flaky outcome never changes state
//! - Probes and forwarded requests feed the same counters
//! - A backend that is not probed is never taken Down by forwarded requests:
//!   its failures stop at Degraded
//! - Latency is an exponential moving average over roughly 20 samples

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::HealthCheckConfig;

/// Samples kept for the error rate.
const OUTCOME_WINDOW: usize = 20;

/// Smoothing factor of the latency average.
const LATENCY_ALPHA: f64 = 0.05;

/// Latency samples above this are clamped.
const LATENCY_LIMIT_MS: f64 = 10_000.0;

/// Score of a backend without any recorded outcome.
const NEUTRAL_SCORE: u8 = 50;

/// Health of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Probing,
    Healthy,
    Degraded,
    Down,
}

impl HealthState {
    /// Whether the selection policy may pick a backend in this state.
    pub fn is_selectable(self) -> bool {
        self != HealthState::Down
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Probing => "probing",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Down => "down",
        }
    }

    /// Numeric value for the state gauge.
    pub fn as_gauge(self) -> f64 {
        match self {
            HealthState::Unknown => 0.0,
            HealthState::Probing => 1.0,
            HealthState::Healthy => 2.0,
            HealthState::Degraded => 3.0,
            HealthState::Down => 4.0,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe or a forwarding attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("timeout")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("JSON-RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FailureReason {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Connection(_) => "connection",
            FailureReason::HttpStatus(_) => "http_status",
            FailureReason::RpcError { .. } => "rpc_error",
            FailureReason::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Where an outcome was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Probe,
    Request,
}

/// State change caused by one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub alias: String,
    pub from: HealthState,
    pub to: HealthState,
}

/// Consecutive-outcome thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hysteresis {
    pub degraded_after: u32,
    pub down_after: u32,
    pub recover_after: u32,
}

impl From<&HealthCheckConfig> for Hysteresis {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            degraded_after: config.degraded_threshold,
            down_after: config.unhealthy_threshold,
            recover_after: config.healthy_threshold,
        }
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self::from(&HealthCheckConfig::default())
    }
}

/// Per-backend counters, split by where they were observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub ok: u64,
    pub failed: u64,
}

/// Sequence number of the last time a backend was handed out, 0 if never.
///
/// Stamped through a shared reference so selection only needs a read lock
/// of the health table.
#[derive(Debug, Default)]
pub struct SelectionStamp(AtomicU64);

impl SelectionStamp {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Move the stamp from `seen` to `next`. Fails when another caller
    /// stamped the backend after `seen` was read.
    pub fn claim(&self, seen: u64, next: u64) -> bool {
        self.0
            .compare_exchange(seen, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Clone for SelectionStamp {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

/// Everything known about the health of one backend.
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Moving average, milliseconds.
    pub avg_latency_ms: Option<f64>,
    pub last_latency_ms: Option<f64>,
    pub requests: Counters,
    pub probes: Counters,
    pub last_probe: Option<SystemTime>,
    pub last_selected: SelectionStamp,
    pub last_error: Option<FailureReason>,
    /// Whether active probes run against this backend.
    pub probed: bool,
    recent: VecDeque<bool>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            avg_latency_ms: None,
            last_latency_ms: None,
            requests: Counters::default(),
            probes: Counters::default(),
            last_probe: None,
            last_selected: SelectionStamp::default(),
            last_error: None,
            probed: true,
            recent: VecDeque::with_capacity(OUTCOME_WINDOW),
        }
    }
}

impl HealthRecord {
    /// Apply a success. Returns the new state if it changed.
    pub fn record_success(&mut self, latency: Duration, source: Source, policy: &Hysteresis) -> Option<HealthState> {
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.push_outcome(true);
        self.add_latency(latency);
        self.counters(source).ok += 1;
        if source == Source::Probe {
            self.last_probe = Some(SystemTime::now());
        }

        let next = match self.state {
            HealthState::Unknown | HealthState::Probing => HealthState::Healthy,
            HealthState::Degraded | HealthState::Down
                if self.consecutive_successes >= policy.recover_after =>
            {
                HealthState::Healthy
            }
            current => current,
        };
        self.set_state(next)
    }

    /// Apply a failure. Returns the new state if it changed.
    pub fn record_failure(&mut self, reason: FailureReason, source: Source, policy: &Hysteresis) -> Option<HealthState> {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.push_outcome(false);
        self.last_error = Some(reason);
        self.counters(source).failed += 1;
        if source == Source::Probe {
            self.last_probe = Some(SystemTime::now());
        }

        let failures = self.consecutive_failures;
        let may_go_down = source == Source::Probe || self.probed;
        let next = if failures >= policy.down_after && may_go_down {
            HealthState::Down
        } else {
            match self.state {
                HealthState::Down => HealthState::Down,
                _ if failures >= policy.degraded_after => HealthState::Degraded,
                HealthState::Probing => HealthState::Unknown,
                current => current,
            }
        };
        self.set_state(next)
    }

    /// Switch active probing on or off. A Down backend that loses its probes
    /// is demoted to Degraded so forwarded traffic can still reach it.
    pub fn set_probed(&mut self, probed: bool) -> Option<HealthState> {
        self.probed = probed;
        if !probed && self.state == HealthState::Down {
            return self.set_state(HealthState::Degraded);
        }
        None
    }

    /// Mark a backend without history as having its first probe in flight.
    pub fn mark_probing(&mut self) -> bool {
        if self.state == HealthState::Unknown {
            self.state = HealthState::Probing;
            true
        } else {
            false
        }
    }

    /// Share of failures among the recent outcomes, `None` without samples.
    pub fn error_rate(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let failed = self.recent.iter().filter(|ok| !**ok).count();
        Some(failed as f64 / self.recent.len() as f64)
    }

    /// Score in `0..=100`, from error rate and latency. Higher is better.
    ///
    /// Every full 20 ms of average latency costs one point, at most 40.
    pub fn score(&self) -> u8 {
        let Some(error_rate) = self.error_rate() else {
            return NEUTRAL_SCORE;
        };
        let base = 100.0 * (1.0 - error_rate);
        let penalty = self
            .avg_latency_ms
            .map(|ms| (ms / 20.0).floor().min(40.0))
            .unwrap_or(0.0);
        (base - penalty).clamp(0.0, 100.0) as u8
    }

    fn counters(&mut self, source: Source) -> &mut Counters {
        match source {
            Source::Probe => &mut self.probes,
            Source::Request => &mut self.requests,
        }
    }

    fn push_outcome(&mut self, ok: bool) {
        if self.recent.len() == OUTCOME_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(ok);
    }

    fn add_latency(&mut self, latency: Duration) {
        let mut sample = latency.as_secs_f64() * 1000.0;
        if sample > LATENCY_LIMIT_MS {
            tracing::debug!(latency_ms = sample, "Latency sample clamped");
            sample = LATENCY_LIMIT_MS;
        }
        self.last_latency_ms = Some(sample);
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            None => sample,
            Some(avg) => avg * (1.0 - LATENCY_ALPHA) + sample * LATENCY_ALPHA,
        });
    }

    fn set_state(&mut self, next: HealthState) -> Option<HealthState> {
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}
