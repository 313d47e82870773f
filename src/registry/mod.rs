//! Backend registry.
//!
//! # Responsibilities
//! - Turn the `[[links]]` configuration into backend descriptors
//! - Publish them as immutable, versioned snapshots
//! - Reload from disk on request or when the file changed (worker.rs)
//!
//! # Data Flow
//! ```text
//! ProxyConfig.links
//!     → build_snapshot (parse URLs, resolve priority)
//!     → equal to current? → keep current (idempotent)
//!     → ArcSwap::store(new Arc<RegistrySnapshot>)
//!     → readers holding the old Arc keep using it until they drop it
//! ```
//!
//! # Design Decisions
//! - Snapshots are never mutated; a reload replaces the whole `Arc`
//! - Validation errors reject the whole reload, the previous snapshot stays
//! - Only the link list and the proxy toggle are reloadable; every other
//!   setting is fixed at startup

pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::{ArcSwap, ArcSwapOption};
use url::Url;

use crate::config::loader::ConfigError;
use crate::config::schema::{ProxyConfig, DEFAULT_PRIORITY};
use crate::config::validation::{parse_link_url, parse_priority, validate_links, RPC_SCHEMES, WS_SCHEMES};

pub use worker::{RegistryCommand, RegistryDrift, RegistryWorker};

/// One upstream endpoint, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub alias: String,
    pub rpc: Url,
    pub ws: Option<Url>,
    pub metrics: Option<Url>,
    /// Tier; lower is preferred.
    pub priority: u32,
    pub enabled: bool,
    pub selectable: bool,
    pub monitored: bool,
    /// Index in the configuration file, last tie breaker.
    pub position: usize,
}

/// Immutable view of the configured backends.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub proxy_enabled: bool,
    pub backends: Vec<Arc<BackendDescriptor>>,
}

impl RegistrySnapshot {
    /// Look a backend up by alias.
    pub fn get(&self, alias: &str) -> Option<&Arc<BackendDescriptor>> {
        self.backends.iter().find(|b| b.alias == alias)
    }

    /// Backends with a health record.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<BackendDescriptor>> {
        self.backends.iter().filter(|b| b.enabled)
    }

    /// Backends the health monitor probes.
    pub fn monitored(&self) -> impl Iterator<Item = &Arc<BackendDescriptor>> {
        self.backends.iter().filter(|b| b.enabled && b.monitored)
    }

    fn same_content(&self, other: &RegistrySnapshot) -> bool {
        self.proxy_enabled == other.proxy_enabled && self.backends == other.backends
    }
}

/// Build a snapshot from a configuration.
pub fn build_snapshot(config: &ProxyConfig, version: u64) -> Result<RegistrySnapshot, ConfigError> {
    validate_links(&config.links)?;

    let mut backends = Vec::with_capacity(config.links.len());
    for (position, link) in config.links.iter().enumerate() {
        let rpc = parse_link_url(&link.alias, "rpc", &link.rpc, RPC_SCHEMES)
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let ws = link
            .ws
            .as_deref()
            .map(|ws| parse_link_url(&link.alias, "ws", ws, WS_SCHEMES))
            .transpose()
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let metrics = link
            .metrics
            .as_deref()
            .map(|m| parse_link_url(&link.alias, "metrics", m, RPC_SCHEMES))
            .transpose()
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let priority = parse_priority(link)
            .map_err(|e| ConfigError::Validation(vec![e]))?
            .unwrap_or(DEFAULT_PRIORITY);

        backends.push(Arc::new(BackendDescriptor {
            alias: link.alias.clone(),
            rpc,
            ws,
            metrics,
            priority,
            enabled: link.enabled,
            selectable: link.selectable,
            monitored: link.monitored,
            position,
        }));
    }

    Ok(RegistrySnapshot {
        version,
        proxy_enabled: config.listener.enabled,
        backends,
    })
}

/// Owner of the current registry snapshot.
#[derive(Debug)]
pub struct Registry {
    current: ArcSwap<RegistrySnapshot>,
    next_version: AtomicU64,
    source_mtime: ArcSwapOption<SystemTime>,
}

impl Registry {
    /// Create a registry holding the snapshot of `config` as version 1.
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let snapshot = build_snapshot(config, 1)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            next_version: AtomicU64::new(2),
            source_mtime: ArcSwapOption::empty(),
        })
    }

    /// The snapshot currently published.
    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Publish the snapshot of `config`.
    ///
    /// Returns the snapshot in effect afterwards: the new one, or the current
    /// one unchanged when `config` describes the same links.
    pub fn load(&self, config: &ProxyConfig) -> Result<Arc<RegistrySnapshot>, ConfigError> {
        let candidate = build_snapshot(config, 0)?;

        let current = self.current();
        if current.same_content(&candidate) {
            return Ok(current);
        }

        let published = Arc::new(RegistrySnapshot {
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            ..candidate
        });
        self.current.store(published.clone());
        Ok(published)
    }

    /// Modification time of the config file the current snapshot came from.
    pub fn source_mtime(&self) -> Option<SystemTime> {
        self.source_mtime.load_full().map(|t| *t)
    }

    pub fn set_source_mtime(&self, mtime: Option<SystemTime>) {
        self.source_mtime.store(mtime.map(Arc::new));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LinkConfig;
    use crate::config::validation::ValidationError;

    fn config(links: Vec<LinkConfig>) -> ProxyConfig {
        ProxyConfig {
            links,
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn priority_defaults_to_last_tier() {
        let registry = Registry::new(&config(vec![
            LinkConfig::new("a", "http://127.0.0.1:9000").with_priority(10),
            LinkConfig::new("b", "https://fullnode.example.org"),
        ]))
        .unwrap();

        let snapshot = registry.current();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.get("a").unwrap().priority, 10);
        assert_eq!(snapshot.get("b").unwrap().priority, DEFAULT_PRIORITY);
        assert_eq!(snapshot.get("b").unwrap().position, 1);
    }

    #[test]
    fn reload_is_idempotent() {
        let links = vec![LinkConfig::new("a", "http://127.0.0.1:9000")];
        let registry = Registry::new(&config(links.clone())).unwrap();

        let same = registry.load(&config(links)).unwrap();
        assert_eq!(same.version, 1);

        let changed = registry
            .load(&config(vec![LinkConfig::new("a", "http://127.0.0.1:9001")]))
            .unwrap();
        assert_eq!(changed.version, 2);
        assert_eq!(registry.current().version, 2);
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let registry = Registry::new(&config(vec![LinkConfig::new("a", "http://127.0.0.1:9000")])).unwrap();
        let held = registry.current();

        registry
            .load(&config(vec![LinkConfig::new("b", "http://127.0.0.1:9001")]))
            .unwrap();

        assert!(held.get("a").is_some());
        assert!(registry.current().get("a").is_none());
    }

    #[test]
    fn rejected_reload_keeps_previous() {
        let registry = Registry::new(&config(vec![LinkConfig::new("a", "http://127.0.0.1:9000")])).unwrap();

        let err = registry
            .load(&config(vec![
                LinkConfig::new("a", "http://127.0.0.1:9000"),
                LinkConfig::new("a", "http://127.0.0.1:9001"),
            ]))
            .unwrap_err();

        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors, vec![ValidationError::DuplicateAlias("a".into())])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.current().version, 1);
    }

    #[test]
    fn proxy_toggle_is_part_of_snapshot() {
        let mut cfg = config(vec![LinkConfig::new("a", "http://127.0.0.1:9000")]);
        let registry = Registry::new(&cfg).unwrap();
        assert!(registry.current().proxy_enabled);

        cfg.listener.enabled = false;
        let snapshot = registry.load(&cfg).unwrap();
        assert!(!snapshot.proxy_enabled);
        assert_eq!(snapshot.version, 2);
    }

    #[test]
    fn monitored_excludes_unprobed_and_disabled_links() {
        let mut traffic_only = LinkConfig::new("traffic", "http://127.0.0.1:9001");
        traffic_only.monitored = false;
        let mut off = LinkConfig::new("off", "http://127.0.0.1:9002");
        off.enabled = false;
        let registry = Registry::new(&config(vec![
            LinkConfig::new("a", "http://127.0.0.1:9000"),
            traffic_only,
            off,
        ]))
        .unwrap();

        let snapshot = registry.current();
        let monitored: Vec<&str> = snapshot.monitored().map(|b| b.alias.as_str()).collect();
        assert_eq!(monitored, vec!["a"]);
        assert_eq!(snapshot.enabled().count(), 2);
        assert!(snapshot.get("traffic").unwrap().selectable);
    }
}
