//! Shared state container.
//!
//! # Responsibilities
//! - Hold everything that must survive a task restart: registry, health
//!   table, request summary, task table, WebSocket sessions, bound listener
//!   addresses
//! - Passed to every task and handler as `Arc<SharedState>`; no globals
//!
//! # Design Decisions
//! - Registry: `ArcSwap`, lock-free reads of whole snapshots
//! - Health: `tokio::sync::RwLock`, which a panicking holder cannot poison;
//!   write guards are held for one mutation, never across I/O
//! - Counters: atomics; task table and sessions: `DashMap`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyConfig;
use crate::health::state::Hysteresis;
use crate::health::table::HealthTable;
use crate::http::sessions::SessionRegistry;
use crate::lifecycle::worker::TaskFault;
use crate::registry::{BackendDescriptor, Registry};

/// State shared by every task of the daemon.
#[derive(Debug)]
pub struct SharedState {
    pub registry: Registry,
    pub health: RwLock<HealthTable>,
    pub activity: Activity,
    pub tasks: DashMap<&'static str, TaskRecord>,
    pub sessions: SessionRegistry,
    /// Local address of every bound listener, by listener name.
    pub listeners: DashMap<&'static str, SocketAddr>,
    /// Settings as loaded at startup.
    pub settings: Arc<ProxyConfig>,
    /// File the registry reloads from, if any.
    pub config_path: Option<PathBuf>,
}

impl SharedState {
    pub fn new(settings: ProxyConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let registry = Registry::new(&settings)?;
        let mut health = HealthTable::new(Hysteresis::from(&settings.health_check));
        for backend in registry.current().enabled() {
            health.track(&backend.alias, settings.health_check.enabled && backend.monitored);
        }

        Ok(Self {
            registry,
            health: RwLock::new(health),
            activity: Activity::default(),
            tasks: DashMap::new(),
            sessions: SessionRegistry::default(),
            listeners: DashMap::new(),
            settings: Arc::new(settings),
            config_path,
        })
    }

    /// Whether active probes run against `backend`.
    pub fn is_probed(&self, backend: &BackendDescriptor) -> bool {
        self.settings.health_check.enabled && backend.enabled && backend.monitored
    }

    /// Record a new incarnation of `task`; returns its number.
    pub fn task_started(&self, task: &'static str) -> u64 {
        let mut record = self.tasks.entry(task).or_default();
        record.incarnation += 1;
        record.running = true;
        record.incarnation
    }

    /// Record the end of the current incarnation of `task`.
    pub fn task_stopped(&self, task: &'static str, fault: Option<&TaskFault>) {
        let mut record = self.tasks.entry(task).or_default();
        record.running = false;
        if let Some(fault) = fault {
            record.restarts += 1;
            record.last_fault = Some(fault.to_string());
        }
    }
}

/// Lifecycle record of one managed task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskRecord {
    pub incarnation: u64,
    pub restarts: u64,
    pub running: bool,
    pub last_fault: Option<String>,
}

/// How client calls ended, across all backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub success_on_first_attempt: u64,
    pub success_on_retry: u64,
    pub fail_no_backend: u64,
    pub fail_retries_exhausted: u64,
    pub fail_bad_request: u64,
    pub fail_proxy_disabled: u64,
}

/// Outcome of one client call, for [`Activity::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Served { attempts: u32 },
    BadRequest,
    NoBackend,
    RetriesExhausted,
    ProxyDisabled,
}

impl CallOutcome {
    pub fn label(self) -> &'static str {
        match self {
            CallOutcome::Served { attempts: 1 } => "ok",
            CallOutcome::Served { .. } => "ok_after_retry",
            CallOutcome::BadRequest => "bad_request",
            CallOutcome::NoBackend => "no_backend",
            CallOutcome::RetriesExhausted => "retries_exhausted",
            CallOutcome::ProxyDisabled => "proxy_disabled",
        }
    }
}

/// Aggregate front-end activity.
#[derive(Debug, Default)]
pub struct Activity {
    last_served: ArcSwapOption<String>,
    first_attempt: AtomicU64,
    on_retry: AtomicU64,
    no_backend: AtomicU64,
    retries_exhausted: AtomicU64,
    bad_request: AtomicU64,
    proxy_disabled: AtomicU64,
}

impl Activity {
    pub fn record(&self, outcome: CallOutcome) {
        let counter = match outcome {
            CallOutcome::Served { attempts: 1 } => &self.first_attempt,
            CallOutcome::Served { .. } => &self.on_retry,
            CallOutcome::BadRequest => &self.bad_request,
            CallOutcome::NoBackend => &self.no_backend,
            CallOutcome::RetriesExhausted => &self.retries_exhausted,
            CallOutcome::ProxyDisabled => &self.proxy_disabled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the backend that answered the latest call.
    pub fn served_by(&self, alias: &str) {
        let unchanged = self
            .last_served
            .load()
            .as_deref()
            .is_some_and(|current| current == alias);
        if !unchanged {
            self.last_served.store(Some(Arc::new(alias.to_string())));
        }
    }

    pub fn last_served(&self) -> Option<String> {
        self.last_served.load_full().map(|alias| alias.as_ref().clone())
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            success_on_first_attempt: self.first_attempt.load(Ordering::Relaxed),
            success_on_retry: self.on_retry.load(Ordering::Relaxed),
            fail_no_backend: self.no_backend.load(Ordering::Relaxed),
            fail_retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            fail_bad_request: self.bad_request.load(Ordering::Relaxed),
            fail_proxy_disabled: self.proxy_disabled.load(Ordering::Relaxed),
        }
    }
}
