//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, attempts, probes, backend state, restarts)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `link_proxy_requests_total` (counter): client calls by backend, outcome
//! - `link_proxy_request_duration_seconds` (histogram): client call latency
//! - `link_proxy_attempt_failures_total` (counter): failed forwarding attempts by backend, reason
//! - `link_proxy_probes_total` (counter): probes by backend, result
//! - `link_proxy_probe_duration_seconds` (histogram): successful probe latency
//! - `link_proxy_backend_state` (gauge): 0=unknown 1=probing 2=healthy 3=degraded 4=down
//! - `link_proxy_websocket_sessions` (gauge): open sessions
//! - `link_proxy_task_restarts_total` (counter): restarts by task
//!
//! # Design Decisions
//! - The `metrics` facade is a no-op until an exporter is installed, so
//!   recording is unconditional

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::health::state::HealthState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished client call.
pub fn record_request(backend: &str, outcome: &'static str, start: Instant) {
    counter!(
        "link_proxy_requests_total",
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "link_proxy_request_duration_seconds",
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record one failed forwarding attempt.
pub fn record_attempt_failure(backend: &str, reason: &'static str) {
    counter!(
        "link_proxy_attempt_failures_total",
        "backend" => backend.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a probe result.
pub fn record_probe(backend: &str, latency: Option<Duration>) {
    let result = if latency.is_some() { "ok" } else { "failed" };
    counter!(
        "link_proxy_probes_total",
        "backend" => backend.to_string(),
        "result" => result
    )
    .increment(1);
    if let Some(latency) = latency {
        histogram!(
            "link_proxy_probe_duration_seconds",
            "backend" => backend.to_string()
        )
        .record(latency.as_secs_f64());
    }
}

/// Record the current state of a backend.
pub fn record_backend_state(backend: &str, state: HealthState) {
    gauge!("link_proxy_backend_state", "backend" => backend.to_string()).set(state.as_gauge());
}

/// Record the number of open WebSocket sessions.
pub fn record_sessions(open: usize) {
    gauge!("link_proxy_websocket_sessions").set(open as f64);
}

/// Record a task restart.
pub fn record_task_restart(task: &'static str) {
    counter!("link_proxy_task_restarts_total", "task" => task).increment(1);
}
