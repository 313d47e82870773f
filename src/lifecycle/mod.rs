//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Supervision (supervisor.rs, worker.rs, mailbox.rs):
//!     factory → worker incarnation → Audit / Update / Exec over its mailbox
//!     fault or panic → backoff → fresh incarnation (audits first)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → watch flag set → every task observes it → bounded join
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Tasks never share a `JoinHandle`; the supervisor owns all of them
//! - Shutdown has timeout: stragglers are aborted after the deadline

pub mod mailbox;
pub mod shutdown;
pub mod signals;
pub mod supervisor;
pub mod worker;

pub use mailbox::{Mailbox, MailboxSender, Message};
pub use shutdown::{Shutdown, ShutdownListener};
pub use supervisor::Supervisor;
pub use worker::{TaskFault, Worker};
