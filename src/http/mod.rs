//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, body limit, tracing)
//!     → request.rs (peek JSON-RPC id and method)
//!     → load_balancer (select backend, excluding those already tried)
//!     → forward.rs (one attempt, bounded by the request timeout)
//!     → response.rs (upstream answer verbatim, or tagged proxy error)
//!     → Send to client
//!
//! WebSocket upgrade
//!     → server.rs (select backend with a ws endpoint, connect upstream)
//!     → websocket.rs (pump frames, registered in sessions.rs)
//! ```

pub mod forward;
pub mod frontend;
pub mod request;
pub mod response;
pub mod server;
pub mod sessions;
pub mod websocket;

pub use frontend::{FrontEndCommand, ProxyFrontEnd, SessionDrift};
pub use request::X_REQUEST_ID;
pub use response::{ProxyError, X_LINK_PROXY_ERROR};
pub use server::{build_router, AppState};
