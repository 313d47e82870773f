//! JSON-RPC / WebSocket failover proxy library.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod state;

pub use config::schema::ProxyConfig;
pub use lifecycle::{Shutdown, Supervisor};
pub use state::SharedState;
