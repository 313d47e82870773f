//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::lifecycle::mailbox::{MailboxSender, Message};
use crate::registry::{RegistryCommand, RegistryDrift};

/// A watcher that asks the registry task to reload when the config file changes.
///
/// The watcher only signals; loading and validating stay with the registry
/// task, which is the single writer of the registry.
pub struct ConfigWatcher {
    path: PathBuf,
    registry: MailboxSender<RegistryDrift, RegistryCommand>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, registry: MailboxSender<RegistryDrift, RegistryCommand>) -> Self {
        Self {
            path: path.to_path_buf(),
            registry,
        }
    }

    /// Start watching. The returned watcher stops when dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let registry = self.registry.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!("Config file change detected, reloading");
                        registry.try_send(Message::Exec(RegistryCommand::ReloadFromDisk));
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // Watch the directory: editors often replace the file instead of writing it.
        let target = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher.watch(target, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}
