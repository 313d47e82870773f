//! Retry classification of upstream answers.
//!
//! # Responsibilities
//! - Decide whether an upstream HTTP status is the backend's fault
//! - Keep client errors out of backend health
//!
//! # Design Decisions
//! - JSON-RPC calls are POSTs; they are retried on another backend anyway
//!   because a failed attempt never reached a healthy node
//! - Connection errors and timeouts are always retryable (handled by the caller)
//! - 408, 429 and 5xx are backend faults: counted against the backend, retried
//! - Other 4xx are the client's fault: delivered as-is, no health event
//! - JSON-RPC error objects inside a 2xx are application errors, delivered as-is

use axum::http::StatusCode;

/// What to do with an upstream HTTP answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Return to the client; the backend did its job.
    Deliver,
    /// Return to the client; the request itself was bad.
    ClientError,
    /// Count a failure against the backend and try another one.
    BackendFault,
}

/// Classify an upstream status code.
pub fn classify_status(status: StatusCode) -> Verdict {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Verdict::BackendFault,
        s if s.is_server_error() => Verdict::BackendFault,
        s if s.is_client_error() => Verdict::ClientError,
        _ => Verdict::Deliver,
    }
}
