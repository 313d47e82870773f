//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe forwarding outcomes
//! - Feed them into the same state machine the probes use
//! - Ask the front-end to tear down sessions of a backend that went Down
//!
//! # Design Decisions
//! - Only connection errors, timeouts, 408, 429 and 5xx count as failures
//! - 4xx are NOT failures (client error, not backend)
//! - One failed attempt is exactly one failure

use std::time::Duration;

use crate::health::state::{FailureReason, HealthState, Source, Transition};
use crate::http::frontend::{FrontEndCommand, SessionDrift};
use crate::lifecycle::mailbox::{MailboxSender, Message};
use crate::observability::metrics;
use crate::state::SharedState;

/// Credit a successful forwarding attempt to `alias`.
pub async fn record_success(state: &SharedState, alias: &str, latency: Duration) {
    let transition = state
        .health
        .write()
        .await
        .record_success(alias, latency, Source::Request);
    if let Some(t) = transition {
        log_transition(&t, None);
    }
}

/// Count a failed forwarding attempt against `alias`.
///
/// A transition to Down is reported to the front-end task, which closes the
/// sessions pinned to the backend. The front-end audit catches the sessions
/// anyway if its mailbox is full.
pub async fn record_failure(
    state: &SharedState,
    frontend: &MailboxSender<SessionDrift, FrontEndCommand>,
    alias: &str,
    reason: FailureReason,
) {
    metrics::record_attempt_failure(alias, reason.kind());
    let transition = state
        .health
        .write()
        .await
        .record_failure(alias, reason.clone(), Source::Request);
    if let Some(t) = transition {
        log_transition(&t, Some(&reason));
        if t.to == HealthState::Down {
            let alias = t.alias.clone();
            if !frontend.try_send(Message::Exec(FrontEndCommand::CloseSessions { alias })) {
                tracing::debug!(backend = %t.alias, "Close request not queued, leaving sessions to the front-end audit");
            }
        }
    }
}

/// Log a state change and update the state gauge.
pub fn log_transition(t: &Transition, reason: Option<&FailureReason>) {
    metrics::record_backend_state(&t.alias, t.to);
    match t.to {
        HealthState::Down => tracing::warn!(
            backend = %t.alias,
            from = %t.from,
            to = %t.to,
            reason = %reason.map(ToString::to_string).unwrap_or_default(),
            "Backend state changed"
        ),
        _ => tracing::info!(
            backend = %t.alias,
            from = %t.from,
            to = %t.to,
            "Backend state changed"
        ),
    }
}
