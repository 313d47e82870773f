//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure of a workdir proxy.
//! All types derive Serde traits for deserialization from the TOML config file.

use serde::{Deserialize, Serialize};

/// Priority assigned to a link that does not specify one (least preferred tier).
pub const DEFAULT_PRIORITY: u32 = u32::MAX;

/// Root configuration for the link proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Inbound listener (bind address, on/off toggle).
    pub listener: ListenerConfig,

    /// Upstream links, in configured order.
    pub links: Vec<LinkConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Task supervision settings.
    pub supervision: SupervisionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Status (admin) API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Proxy on/off toggle. While off, requests are answered with a proxy error.
    pub enabled: bool,

    /// Bind address (e.g., "127.0.0.1:44340").
    pub bind_address: String,

    /// Maximum accepted request body, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:44340".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// One upstream link (a full-node endpoint).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LinkConfig {
    /// Unique identifier of the link.
    pub alias: String,

    /// JSON-RPC endpoint (http or https).
    pub rpc: String,

    /// WebSocket endpoint (ws or wss).
    #[serde(default)]
    pub ws: Option<String>,

    /// Prometheus metrics endpoint of the node, informational only.
    #[serde(default)]
    pub metrics: Option<String>,

    /// Priority tier, smaller is preferred. Kept signed so that negative values
    /// can be reported instead of failing deserialization.
    #[serde(default)]
    pub priority: Option<i64>,

    /// A disabled link is listed but never selected nor probed.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether client traffic may be routed to the link.
    #[serde(default = "default_true")]
    pub selectable: bool,

    /// Whether the health monitor probes the link.
    #[serde(default = "default_true")]
    pub monitored: bool,
}

impl LinkConfig {
    /// A link with only the required fields set.
    pub fn new(alias: impl Into<String>, rpc: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            rpc: rpc.into(),
            ws: None,
            metrics: None,
            priority: None,
            enabled: true,
            selectable: true,
            monitored: true,
        }
    }

    /// Builder-style priority setter.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder-style WebSocket URL setter.
    pub fn with_ws(mut self, ws: impl Into<String>) -> Self {
        self.ws = Some(ws.into());
        self
    }
}

fn default_true() -> bool {
    true
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe round interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// JSON-RPC method used as liveness probe. Should be cheap for the node.
    pub probe_method: String,

    /// Consecutive failures before Healthy becomes Degraded.
    pub degraded_threshold: u32,

    /// Consecutive failures before a backend is marked Down.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before Degraded/Down becomes Healthy again.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_ms: 2_000,
            probe_method: "sui_getLatestCheckpointSequenceNumber".to_string(),
            degraded_threshold: 2,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Timeout of one forwarding attempt (request + full response) in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 3_000,
            request_ms: 10_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total forwarding attempts per client call, first attempt included.
    /// Every retry goes to a backend not tried yet for that call.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Task supervision configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SupervisionConfig {
    /// Interval between audit messages sent to every managed task, in milliseconds.
    pub audit_interval_ms: u64,

    /// First restart delay after a task fault, in milliseconds.
    pub restart_base_delay_ms: u64,

    /// Upper bound of the restart delay, in milliseconds.
    pub restart_max_delay_ms: u64,

    /// Capacity of each task inbound queue.
    pub mailbox_capacity: usize,

    /// How long shutdown waits for tasks before aborting them, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            audit_interval_ms: 2_000,
            restart_base_delay_ms: 250,
            restart_max_delay_ms: 5_000,
            mailbox_capacity: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Status API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the status API.
    pub enabled: bool,

    /// Status API bind address.
    pub bind_address: String,

    /// Optional bearer key. When unset the API is open (it is read-only).
    pub api_key: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:44399".to_string(),
            api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[links]]
            alias = "localnet"
            rpc = "http://127.0.0.1:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.links.len(), 1);
        assert!(config.links[0].enabled);
        assert_eq!(config.links[0].priority, None);
        assert_eq!(config.retries.max_attempts, 2);
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.listener.bind_address, "127.0.0.1:44340");
    }

    #[test]
    fn full_link_entry() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            enabled = false

            [observability]
            log_format = "json"

            [[links]]
            alias = "mainnet-a"
            rpc = "https://fullnode.example.org:443"
            ws = "wss://fullnode.example.org:443"
            metrics = "http://fullnode.example.org:9184/metrics"
            priority = 10
            enabled = false
            "#,
        )
        .unwrap();

        let link = &config.links[0];
        assert_eq!(link.priority, Some(10));
        assert!(!link.enabled);
        assert_eq!(link.ws.as_deref(), Some("wss://fullnode.example.org:443"));
        assert!(!config.listener.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
