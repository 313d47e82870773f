//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//! - Trigger appropriate actions (shutdown, reload)
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown

use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::mailbox::MailboxSender;
use crate::registry::{RegistryCommand, RegistryDrift};

/// Wait for SIGINT or SIGTERM, then trigger shutdown.
///
/// Meanwhile each SIGHUP asks the registry task to reload the config file.
pub async fn wait_for_shutdown(
    shutdown: &Shutdown,
    registry: MailboxSender<RegistryDrift, RegistryCommand>,
) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        let mut hup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res?;
                    tracing::info!(signal = "SIGINT", "Shutdown signal received");
                    break;
                }
                _ = term.recv() => {
                    tracing::info!(signal = "SIGTERM", "Shutdown signal received");
                    break;
                }
                _ = hup.recv() => {
                    tracing::info!(signal = "SIGHUP", "Reload requested");
                    registry.exec(RegistryCommand::ReloadFromDisk).await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = registry;
        tokio::signal::ctrl_c().await?;
        tracing::info!(signal = "ctrl-c", "Shutdown signal received");
    }

    shutdown.trigger();
    Ok(())
}
