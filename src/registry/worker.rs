//! Registry reload listener.
//!
//! A managed task that re-reads the config file when asked (file watcher,
//! SIGHUP) or when its audit notices the file modification time moved.
//! After publishing a new snapshot it asks the health monitor and the
//! front-end to audit, so they prune what the reload removed.

use std::sync::Arc;

use crate::config::loader::{config_mtime, load_config};
use crate::health::active::{HealthDrift, MonitorCommand};
use crate::http::frontend::{FrontEndCommand, SessionDrift};
use crate::lifecycle::mailbox::MailboxSender;
use crate::lifecycle::worker::{TaskFault, Worker};
use crate::state::SharedState;

/// Work requests for the registry task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCommand {
    ReloadFromDisk,
}

/// Drift between the config file and the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryDrift {
    SourceChanged,
}

/// The registry task.
pub struct RegistryWorker {
    shared: Arc<SharedState>,
    monitor: MailboxSender<HealthDrift, MonitorCommand>,
    frontend: MailboxSender<SessionDrift, FrontEndCommand>,
}

impl RegistryWorker {
    pub fn new(
        shared: Arc<SharedState>,
        monitor: MailboxSender<HealthDrift, MonitorCommand>,
        frontend: MailboxSender<SessionDrift, FrontEndCommand>,
    ) -> Self {
        Self {
            shared,
            monitor,
            frontend,
        }
    }

    fn reload(&self) {
        let Some(path) = self.shared.config_path.as_deref() else {
            tracing::debug!("No config file, nothing to reload");
            return;
        };

        let registry = &self.shared.registry;
        let mtime = config_mtime(path);
        // Remember the mtime even when the file is rejected, so that audit
        // does not retry the same broken file on every tick.
        registry.set_source_mtime(mtime);

        let config = match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Config reload rejected, keeping current links");
                return;
            }
        };

        let before = registry.current().version;
        match registry.load(&config) {
            Ok(snapshot) if snapshot.version != before => {
                tracing::info!(
                    version = snapshot.version,
                    links = snapshot.backends.len(),
                    proxy_enabled = snapshot.proxy_enabled,
                    "Registry reloaded"
                );
                self.monitor.audit();
                self.frontend.audit();
            }
            Ok(_) => tracing::debug!("Config reloaded, links unchanged"),
            Err(e) => tracing::warn!(error = %e, "Config reload rejected, keeping current links"),
        }
    }
}

impl Worker for RegistryWorker {
    type Drift = RegistryDrift;
    type Command = RegistryCommand;

    const NAME: &'static str = "registry";

    async fn audit(&self) -> Option<RegistryDrift> {
        let path = self.shared.config_path.as_deref()?;
        let on_disk = config_mtime(path)?;
        (Some(on_disk) != self.shared.registry.source_mtime()).then_some(RegistryDrift::SourceChanged)
    }

    async fn update(&mut self, drift: RegistryDrift) -> Result<(), TaskFault> {
        match drift {
            RegistryDrift::SourceChanged => self.reload(),
        }
        Ok(())
    }

    async fn exec(&mut self, command: RegistryCommand) -> Result<(), TaskFault> {
        match command {
            RegistryCommand::ReloadFromDisk => self.reload(),
        }
        Ok(())
    }
}
