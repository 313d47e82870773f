//! Link proxy daemon.
//!
//! Local failover proxy in front of a set of full-node links. Clients talk
//! JSON-RPC (HTTP POST) or WebSocket to one local address; every call goes to
//! the best backend currently known healthy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                  LINK PROXY                      │
//!                       │                                                  │
//!     Client call       │  ┌──────────┐   ┌──────────────┐   ┌─────────┐   │
//!     ──────────────────┼─▶│ frontend │──▶│load_balancer │──▶│ forward │───┼──▶ Backend
//!                       │  │  (http)  │   │ rank/select  │   │ / ws    │   │    links
//!     ◀─────────────────┼──│          │◀──│              │◀──│         │◀──┼───
//!                       │  └────┬─────┘   └──────▲───────┘   └────┬────┘   │
//!                       │       │ outcomes       │ snapshots      │        │
//!                       │       ▼                │                ▼        │
//!                       │  ┌──────────┐   ┌──────┴───────┐   ┌─────────┐   │
//!                       │  │  health  │──▶│   registry   │   │ passive │   │
//!                       │  │ monitor  │   │  (ArcSwap)   │   │ health  │   │
//!                       │  └──────────┘   └──────────────┘   └─────────┘   │
//!                       │                                                  │
//!                       │  supervisor: audit / update / exec, restarts     │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use link_proxy::config::loader::{config_mtime, load_config};
use link_proxy::config::watcher::ConfigWatcher;
use link_proxy::health::{HealthMonitor, MonitorCommand};
use link_proxy::http::ProxyFrontEnd;
use link_proxy::lifecycle::{signals, Mailbox, Message, Shutdown, Supervisor};
use link_proxy::observability::{logging, metrics};
use link_proxy::registry::RegistryWorker;
use link_proxy::SharedState;

#[derive(Parser)]
#[command(name = "link-proxy")]
#[command(about = "Local JSON-RPC/WebSocket failover proxy", long_about = None)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, default_value = "link-proxy.toml")]
    config: PathBuf,

    /// Log level, overrides the configured one.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("link-proxy: {}: {}", cli.config.display(), e);
            std::process::exit(2);
        }
    };

    logging::init_logging(&config.observability, cli.log_level.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "link-proxy starting");

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let probe_every = Duration::from_secs(config.health_check.interval_secs);
    let probing = config.health_check.enabled;
    let capacity = config.supervision.mailbox_capacity;

    let shared = Arc::new(SharedState::new(config, Some(cli.config.clone()))?);
    shared.registry.set_source_mtime(config_mtime(&cli.config));
    tracing::info!(
        links = shared.registry.current().backends.len(),
        bind_address = %shared.settings.listener.bind_address,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let mut supervisor = Supervisor::new(shared.clone(), shutdown.clone());

    let registry_box = Mailbox::new("registry", capacity);
    let monitor_box = Mailbox::new("health-monitor", capacity);
    let frontend_box = Mailbox::new("frontend", capacity);

    let registry_tx = registry_box.sender();
    let monitor_tx = monitor_box.sender();
    let frontend_tx = frontend_box.sender();

    // First probe round right away, the clock below only starts after one period.
    if probing {
        monitor_tx.try_send(Message::Exec(MonitorCommand::ProbeAll));
        supervisor.schedule(monitor_tx.clone(), probe_every, || Message::Exec(MonitorCommand::ProbeAll));
    }

    {
        let shared = shared.clone();
        let (monitor_tx, frontend_tx) = (monitor_tx.clone(), frontend_tx.clone());
        supervisor.spawn(registry_box, move || {
            RegistryWorker::new(shared.clone(), monitor_tx.clone(), frontend_tx.clone())
        });
    }
    {
        let shared = shared.clone();
        let frontend_tx = frontend_tx.clone();
        supervisor.spawn(monitor_box, move || HealthMonitor::new(shared.clone(), frontend_tx.clone()));
    }
    {
        let shared = shared.clone();
        let listener = shutdown.subscribe();
        let frontend_tx = frontend_tx.clone();
        supervisor.spawn(frontend_box, move || {
            ProxyFrontEnd::new(shared.clone(), listener.clone(), frontend_tx.clone())
        });
    }

    let _watcher = match ConfigWatcher::new(&cli.config, registry_tx.clone()).run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload on SIGHUP only");
            None
        }
    };

    signals::wait_for_shutdown(&shutdown, registry_tx).await?;

    tracing::info!("Shutting down");
    supervisor.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
