//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every monitored backend (on `Exec(ProbeAll)`)
//! - Update the shared health table based on results
//! - Keep the health table aligned with the registry (audit / update)
//! - Ask the front-end to close sessions of backends that went Down
//!
//! # Design Decisions
//! - Probes of one round run concurrently; the table is written once per
//!   round, after every probe answered or timed out
//! - The table lives in shared state, so a restarted monitor resumes with
//!   the counters of its predecessor

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::health::passive::log_transition;
use crate::health::probe::Prober;
use crate::health::state::{HealthState, Source};
use crate::http::frontend::{FrontEndCommand, SessionDrift};
use crate::lifecycle::mailbox::MailboxSender;
use crate::lifecycle::worker::{TaskFault, Worker};
use crate::observability::metrics;
use crate::state::SharedState;

/// Work requests for the health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Probe every monitored backend once.
    ProbeAll,
    /// Panic inside the monitor, to exercise supervision.
    #[cfg(test)]
    Crash,
}

/// Disagreement between the registry and the health table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthDrift {
    /// Enabled backends without a health record.
    pub missing: Vec<String>,
    /// Health records of backends no longer enabled in the registry.
    pub stale: Vec<String>,
    /// Records whose probed flag disagrees with the registry.
    pub probing: Vec<String>,
}

/// The health monitor task.
pub struct HealthMonitor {
    shared: Arc<SharedState>,
    frontend: MailboxSender<SessionDrift, FrontEndCommand>,
    prober: Option<Prober>,
}

impl HealthMonitor {
    pub fn new(shared: Arc<SharedState>, frontend: MailboxSender<SessionDrift, FrontEndCommand>) -> Self {
        Self {
            shared,
            frontend,
            prober: None,
        }
    }

    async fn probe_all(&self) {
        let Some(prober) = &self.prober else { return };

        let snapshot = self.shared.registry.current();
        let targets: Vec<_> = snapshot.monitored().cloned().collect();
        if targets.is_empty() {
            return;
        }

        {
            let mut health = self.shared.health.write().await;
            for backend in &targets {
                health.mark_probing(&backend.alias);
            }
        }

        let results = join_all(targets.iter().map(|backend| async move {
            (backend, prober.probe(&backend.rpc).await)
        }))
        .await;

        let mut went_down = Vec::new();
        {
            let mut health = self.shared.health.write().await;
            for (backend, result) in results {
                let alias = backend.alias.as_str();
                let transition = match result {
                    Ok(latency) => {
                        metrics::record_probe(alias, Some(latency));
                        health
                            .record_success(alias, latency, Source::Probe)
                            .map(|t| (t, None))
                    }
                    Err(reason) => {
                        metrics::record_probe(alias, None);
                        tracing::debug!(backend = alias, reason = %reason, "Probe failed");
                        health
                            .record_failure(alias, reason.clone(), Source::Probe)
                            .map(|t| (t, Some(reason)))
                    }
                };
                if let Some((t, reason)) = transition {
                    log_transition(&t, reason.as_ref());
                    if t.to == HealthState::Down {
                        went_down.push(t.alias);
                    }
                }
            }
        }

        for alias in went_down {
            self.frontend.exec(FrontEndCommand::CloseSessions { alias }).await;
        }
    }
}

impl Worker for HealthMonitor {
    type Drift = HealthDrift;
    type Command = MonitorCommand;

    const NAME: &'static str = "health-monitor";

    async fn start(&mut self) -> Result<(), TaskFault> {
        self.prober = Some(Prober::new(&self.shared.settings.health_check).map_err(TaskFault::failed)?);
        Ok(())
    }

    async fn audit(&self) -> Option<HealthDrift> {
        let snapshot = self.shared.registry.current();
        let enabled: HashSet<&str> = snapshot.enabled().map(|b| b.alias.as_str()).collect();
        let health = self.shared.health.read().await;

        let drift = HealthDrift {
            probing: snapshot
                .enabled()
                .filter(|b| {
                    health
                        .get(&b.alias)
                        .is_some_and(|r| r.probed != self.shared.is_probed(b))
                })
                .map(|b| b.alias.clone())
                .collect(),
            missing: enabled
                .iter()
                .filter(|alias| health.get(alias).is_none())
                .map(|alias| alias.to_string())
                .collect(),
            stale: health
                .aliases()
                .filter(|alias| !enabled.contains(alias))
                .map(str::to_string)
                .collect(),
        };
        (drift != HealthDrift::default()).then_some(drift)
    }

    async fn update(&mut self, drift: HealthDrift) -> Result<(), TaskFault> {
        // Re-read the registry: it may have moved since the audit.
        let snapshot = self.shared.registry.current();
        let enabled: HashSet<&str> = snapshot.enabled().map(|b| b.alias.as_str()).collect();

        let mut health = self.shared.health.write().await;
        for backend in snapshot.enabled() {
            let listed = drift.missing.contains(&backend.alias) || drift.probing.contains(&backend.alias);
            if listed && health.track(&backend.alias, self.shared.is_probed(backend)) {
                tracing::info!(backend = %backend.alias, "Tracking health of new backend");
            }
        }
        for alias in health.prune(&enabled) {
            tracing::info!(backend = %alias, "Dropped health record of removed backend");
        }
        Ok(())
    }

    async fn exec(&mut self, command: MonitorCommand) -> Result<(), TaskFault> {
        match command {
            MonitorCommand::ProbeAll => self.probe_all().await,
            #[cfg(test)]
            MonitorCommand::Crash => panic!("injected monitor fault"),
        }
        Ok(())
    }
}
