//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! Client call
//!     → registry snapshot captured by the handler
//!     → snapshot.rs: rank(registry, health, filter) → SelectionSnapshot
//!         order: tier, score desc, least recently selected, configured order
//!     → selector.rs: first candidate whose selection stamp it wins
//!     → Selected backend, or NoBackendAvailable
//! ```
//!
//! # Design Decisions
//! - Ranking is a pure function over immutable inputs
//! - Down, disabled and excluded backends never appear in a snapshot
//! - The selection snapshot is rebuilt per call, never cached nor mutated
//! - Selection holds only the health read lock; stamps are atomic

pub mod selector;
pub mod snapshot;

pub use selector::{select, NoBackendAvailable};
pub use snapshot::{rank, Candidate, SelectionFilter, SelectionSnapshot};
