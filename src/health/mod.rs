//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs, probe.rs):
//!     Probe timer → Exec(ProbeAll)
//!     → Probe each enabled backend concurrently
//!     → Update table.rs
//!
//! Passive health checks (passive.rs):
//!     Forwarding attempt outcome observed
//!     → Same counters as the probes
//!
//! State machine (state.rs):
//!     Unknown → Probing → Healthy ←→ Degraded → Down
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend and lives in shared state

pub mod active;
pub mod passive;
pub mod probe;
pub mod state;
pub mod table;

pub use active::{HealthDrift, HealthMonitor, MonitorCommand};
pub use state::{FailureReason, HealthState};
pub use table::HealthTable;
