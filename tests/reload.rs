//! Registry reload through the supervised tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use link_proxy::config::loader::{config_mtime, load_config};
use link_proxy::health::HealthMonitor;
use link_proxy::http::{FrontEndCommand, SessionDrift};
use link_proxy::lifecycle::{Mailbox, MailboxSender, Shutdown, Supervisor};
use link_proxy::registry::{RegistryCommand, RegistryDrift, RegistryWorker};
use link_proxy::SharedState;

const HEADER: &str = r#"
[health_check]
enabled = false

[supervision]
audit_interval_ms = 50
"#;

fn links_toml(aliases: &[&str]) -> String {
    let mut text = HEADER.to_string();
    for (i, alias) in aliases.iter().enumerate() {
        text.push_str(&format!(
            "\n[[links]]\nalias = \"{}\"\nrpc = \"http://127.0.0.1:{}\"\npriority = {}\n",
            alias,
            9100 + i,
            i
        ));
    }
    text
}

struct TempConfig(PathBuf);

impl TempConfig {
    fn new(contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("link-proxy-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        Self(path)
    }

    fn write(&self, contents: &str) {
        std::fs::write(&self.0, contents).unwrap();
    }
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

struct Daemon {
    shared: Arc<SharedState>,
    shutdown: Shutdown,
    supervisor: Supervisor,
    registry: MailboxSender<RegistryDrift, RegistryCommand>,
    _frontend: Mailbox<SessionDrift, FrontEndCommand>,
}

fn start(file: &TempConfig) -> Daemon {
    let config = load_config(&file.0).unwrap();
    let shared = Arc::new(SharedState::new(config, Some(file.0.clone())).unwrap());
    shared.registry.set_source_mtime(config_mtime(&file.0));

    let shutdown = Shutdown::new();
    let mut supervisor = Supervisor::new(shared.clone(), shutdown.clone());

    let registry_box = Mailbox::new("registry", 16);
    let monitor_box = Mailbox::new("health-monitor", 16);
    // Front-end mailbox without a consumer: the proxy listener is not needed here.
    let frontend_box = Mailbox::new("frontend", 16);

    let registry = registry_box.sender();
    let monitor_tx = monitor_box.sender();
    let frontend_tx = frontend_box.sender();

    {
        let shared = shared.clone();
        let (monitor_tx, frontend_tx) = (monitor_tx.clone(), frontend_tx.clone());
        supervisor.spawn(registry_box, move || {
            RegistryWorker::new(shared.clone(), monitor_tx.clone(), frontend_tx.clone())
        });
    }
    {
        let shared = shared.clone();
        supervisor.spawn(monitor_box, move || HealthMonitor::new(shared.clone(), frontend_tx.clone()));
    }

    Daemon {
        shared,
        shutdown,
        supervisor,
        registry,
        _frontend: frontend_box,
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn removed_backend_is_pruned_from_health_table() {
    let file = TempConfig::new(&links_toml(&["a", "b"]));
    let daemon = start(&file);
    assert_eq!(daemon.shared.health.read().await.len(), 2);

    file.write(&links_toml(&["a", "c"]));
    daemon.registry.exec(RegistryCommand::ReloadFromDisk).await;

    let shared = daemon.shared.clone();
    eventually("registry version 2", || shared.registry.current().version == 2).await;
    let snapshot = daemon.shared.registry.current();
    assert!(snapshot.get("b").is_none());
    assert!(snapshot.get("c").is_some());

    for _ in 0..100 {
        let health = daemon.shared.health.read().await;
        if health.get("b").is_none() && health.get("c").is_some() {
            break;
        }
        drop(health);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let health = daemon.shared.health.read().await;
    assert!(health.get("b").is_none(), "stale record pruned");
    assert!(health.get("c").is_some(), "new record tracked");
    drop(health);

    daemon.shutdown.trigger();
    daemon.supervisor.join().await;
}

#[tokio::test]
async fn invalid_file_keeps_last_good_snapshot() {
    let file = TempConfig::new(&links_toml(&["a"]));
    let daemon = start(&file);

    file.write(&format!(
        "{}\n[[links]]\nalias = \"a\"\nrpc = \"not a url\"\n",
        HEADER
    ));
    daemon.registry.exec(RegistryCommand::ReloadFromDisk).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = daemon.shared.registry.current();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.get("a").unwrap().rpc.as_str(), "http://127.0.0.1:9100/");

    daemon.shutdown.trigger();
    daemon.supervisor.join().await;
}

#[tokio::test]
async fn audit_notices_file_change_without_signal() {
    let file = TempConfig::new(&links_toml(&["a"]));
    let daemon = start(&file);

    // Pretend the file was read long ago so the next audit sees a drift.
    daemon.shared.registry.set_source_mtime(None);
    file.write(&links_toml(&["a", "b"]));

    let shared = daemon.shared.clone();
    eventually("registry reload by audit", || shared.registry.current().get("b").is_some()).await;

    daemon.shutdown.trigger();
    daemon.supervisor.join().await;
}
