use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::health::state::{Counters, HealthRecord, HealthState};
use crate::state::{RequestSummary, SharedState, TaskRecord};

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatus {
    pub incarnation: u64,
    pub restarts: u64,
    pub running: bool,
    pub last_fault: Option<String>,
}

impl From<&TaskRecord> for TaskStatus {
    fn from(record: &TaskRecord) -> Self {
        Self {
            incarnation: record.incarnation,
            restarts: record.restarts,
            running: record.running,
            last_fault: record.last_fault.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub proxy_enabled: bool,
    pub registry_version: u64,
    pub health_epoch: u64,
    pub last_served: Option<String>,
    pub open_sessions: usize,
    /// Bound address of each listener.
    pub listeners: BTreeMap<String, String>,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub summary: RequestSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkStatus {
    pub alias: String,
    /// "OK", "DOWN", or empty while unknown or disabled.
    pub status: String,
    pub state: Option<HealthState>,
    pub enabled: bool,
    /// Configured for traffic and not Down.
    pub selectable: bool,
    pub monitored: bool,
    pub priority: u32,
    pub rpc: String,
    pub ws: Option<String>,
    pub health_score: Option<u8>,
    /// Share of the calls served by this link, in percent.
    pub load_pct: f64,
    pub avg_resp_ms: Option<f64>,
    pub last_resp_ms: Option<f64>,
    /// Successful outcomes among probes and calls, in percent.
    pub success_pct: Option<f64>,
    pub requests: Counters,
    pub probes: Counters,
    pub last_probe_unix_ms: Option<u64>,
    pub error_info: Option<String>,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinksResponse {
    pub proxy_enabled: bool,
    pub registry_version: u64,
    pub last_served: Option<String>,
    pub links: Vec<LinkStatus>,
    pub summary: RequestSummary,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let shared = &state.shared;
    let registry = shared.registry.current();
    let health_epoch = shared.health.read().await.epoch();
    let tasks = shared
        .tasks
        .iter()
        .map(|entry| (entry.key().to_string(), TaskStatus::from(entry.value())))
        .collect();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        proxy_enabled: registry.proxy_enabled,
        registry_version: registry.version,
        health_epoch,
        last_served: shared.activity.last_served(),
        open_sessions: shared.sessions.len(),
        listeners: shared
            .listeners
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().to_string()))
            .collect(),
        tasks,
        summary: shared.activity.summary(),
    })
}

pub async fn get_links(State(state): State<AdminState>) -> Json<LinksResponse> {
    Json(links_response(&state.shared).await)
}

pub async fn links_response(shared: &SharedState) -> LinksResponse {
    let registry = shared.registry.current();
    let health = shared.health.read().await;
    let pinned = shared.sessions.pinned();

    let served_total: u64 = registry
        .backends
        .iter()
        .filter_map(|b| health.get(&b.alias))
        .map(|r| r.requests.ok)
        .sum();

    let links = registry
        .backends
        .iter()
        .map(|backend| {
            let record = backend.enabled.then(|| health.get(&backend.alias)).flatten();
            let state = backend.enabled.then(|| health.state(&backend.alias));
            LinkStatus {
                alias: backend.alias.clone(),
                status: status_label(state).to_string(),
                state,
                enabled: backend.enabled,
                selectable: backend.selectable && state.is_some_and(HealthState::is_selectable),
                monitored: backend.monitored,
                priority: backend.priority,
                rpc: backend.rpc.to_string(),
                ws: backend.ws.as_ref().map(ToString::to_string),
                health_score: record.map(HealthRecord::score),
                load_pct: record.map_or(0.0, |r| percent(r.requests.ok, served_total)),
                avg_resp_ms: record.and_then(|r| r.avg_latency_ms),
                last_resp_ms: record.and_then(|r| r.last_latency_ms),
                success_pct: record.and_then(success_pct),
                requests: record.map(|r| r.requests).unwrap_or_default(),
                probes: record.map(|r| r.probes).unwrap_or_default(),
                last_probe_unix_ms: record
                    .and_then(|r| r.last_probe)
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64),
                error_info: record.and_then(|r| r.last_error.as_ref()).map(ToString::to_string),
                sessions: pinned.iter().filter(|(_, alias)| *alias == backend.alias).count(),
            }
        })
        .collect();

    LinksResponse {
        proxy_enabled: registry.proxy_enabled,
        registry_version: registry.version,
        last_served: shared.activity.last_served(),
        links,
        summary: shared.activity.summary(),
    }
}

fn status_label(state: Option<HealthState>) -> &'static str {
    match state {
        Some(HealthState::Healthy | HealthState::Degraded) => "OK",
        Some(HealthState::Down) => "DOWN",
        _ => "",
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn success_pct(record: &HealthRecord) -> Option<f64> {
    let ok = record.requests.ok + record.probes.ok;
    let total = ok + record.requests.failed + record.probes.failed;
    (total > 0).then(|| percent(ok, total))
}
