//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check link integrity (unique aliases, parseable URLs, priority range)
//! - Validate value ranges (thresholds ordered, intervals > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted into the system, at startup and on every reload

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{LinkConfig, ProxyConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("link #{index} has an empty alias")]
    EmptyAlias { index: usize },

    #[error("duplicate link alias '{0}'")]
    DuplicateAlias(String),

    #[error("link '{alias}': invalid {field} URL '{value}': {reason}")]
    InvalidUrl {
        alias: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("link '{alias}': priority {priority} is negative")]
    NegativePriority { alias: String, priority: i64 },

    #[error("link '{alias}': priority {priority} is out of range")]
    PriorityOutOfRange { alias: String, priority: i64 },

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("health_check.degraded_threshold ({degraded}) must not exceed unhealthy_threshold ({unhealthy})")]
    ThresholdOrder { degraded: u32, unhealthy: u32 },
}

/// Validate a whole configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = link_errors(&config.links);

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let hc = &config.health_check;
    check_nonzero(&mut errors, "health_check.interval_secs", hc.interval_secs);
    check_nonzero(&mut errors, "health_check.timeout_ms", hc.timeout_ms);
    check_nonzero(&mut errors, "health_check.degraded_threshold", hc.degraded_threshold.into());
    check_nonzero(&mut errors, "health_check.unhealthy_threshold", hc.unhealthy_threshold.into());
    check_nonzero(&mut errors, "health_check.healthy_threshold", hc.healthy_threshold.into());
    if hc.degraded_threshold > hc.unhealthy_threshold {
        errors.push(ValidationError::ThresholdOrder {
            degraded: hc.degraded_threshold,
            unhealthy: hc.unhealthy_threshold,
        });
    }

    check_nonzero(&mut errors, "timeouts.request_ms", config.timeouts.request_ms);
    check_nonzero(&mut errors, "timeouts.connect_ms", config.timeouts.connect_ms);
    check_nonzero(&mut errors, "retries.max_attempts", config.retries.max_attempts.into());
    check_nonzero(&mut errors, "supervision.audit_interval_ms", config.supervision.audit_interval_ms);
    check_nonzero(
        &mut errors,
        "supervision.mailbox_capacity",
        config.supervision.mailbox_capacity as u64,
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the link list alone. This is what a registry reload checks.
pub fn validate_links(links: &[LinkConfig]) -> Result<(), Vec<ValidationError>> {
    let errors = link_errors(links);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse the priority of a link into its tier.
pub fn parse_priority(link: &LinkConfig) -> Result<Option<u32>, ValidationError> {
    match link.priority {
        None => Ok(None),
        Some(p) if p < 0 => Err(ValidationError::NegativePriority {
            alias: link.alias.clone(),
            priority: p,
        }),
        Some(p) => u32::try_from(p).map(Some).map_err(|_| ValidationError::PriorityOutOfRange {
            alias: link.alias.clone(),
            priority: p,
        }),
    }
}

/// Parse one URL of a link, restricted to the given schemes.
pub fn parse_link_url(
    alias: &str,
    field: &'static str,
    value: &str,
    schemes: &[&str],
) -> Result<Url, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidUrl {
        alias: alias.to_string(),
        field,
        value: value.to_string(),
        reason,
    };

    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!("scheme must be one of {}", schemes.join(", "))));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

pub(crate) const RPC_SCHEMES: &[&str] = &["http", "https"];
pub(crate) const WS_SCHEMES: &[&str] = &["ws", "wss"];

fn link_errors(links: &[LinkConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for (index, link) in links.iter().enumerate() {
        if link.alias.trim().is_empty() {
            errors.push(ValidationError::EmptyAlias { index });
            continue;
        }
        if !seen.insert(link.alias.as_str()) {
            errors.push(ValidationError::DuplicateAlias(link.alias.clone()));
        }
        if let Err(e) = parse_link_url(&link.alias, "rpc", &link.rpc, RPC_SCHEMES) {
            errors.push(e);
        }
        if let Some(ws) = &link.ws {
            if let Err(e) = parse_link_url(&link.alias, "ws", ws, WS_SCHEMES) {
                errors.push(e);
            }
        }
        if let Some(metrics) = &link.metrics {
            if let Err(e) = parse_link_url(&link.alias, "metrics", metrics, RPC_SCHEMES) {
                errors.push(e);
            }
        }
        if let Err(e) = parse_priority(link) {
            errors.push(e);
        }
    }

    errors
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}
