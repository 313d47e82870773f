//! Read-only status API, consumed by `link-proxy-cli`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};

use self::auth::admin_auth_middleware;
use self::handlers::{get_links, get_status};
use crate::state::SharedState;

/// State of the status API handlers.
#[derive(Clone)]
pub struct AdminState {
    pub shared: Arc<SharedState>,
    pub api_key: Option<Arc<str>>,
}

pub fn router(shared: Arc<SharedState>, api_key: Option<String>) -> Router {
    let state = AdminState {
        shared,
        api_key: api_key.map(Arc::from),
    };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/links", get(get_links))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
