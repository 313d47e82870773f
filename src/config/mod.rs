//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every error reported)
//!     → ProxyConfig (validated, immutable)
//!     → startup settings shared via Arc; links fed to the registry
//!
//! On reload signal (watcher.rs, SIGHUP, registry audit):
//!     registry task re-runs loader.rs + validation.rs
//!     → registry publishes a new snapshot, or keeps the last good one
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, HealthCheckConfig, LinkConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig,
    RetryConfig, SupervisionConfig, TimeoutConfig,
};
