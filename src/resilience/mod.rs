//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → per-attempt deadline (http/forward.rs)
//!     → On failure: retries.rs (is it the backend's fault?) → next backend
//!
//! Task fault:
//!     → backoff.rs (jittered exponential delay) → restart
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retries go to a different backend, without delay
//! - Backend exclusion is the health state machine's job, not a circuit breaker's

pub mod backoff;
pub mod retries;
