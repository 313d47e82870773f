//! Optional bearer-key check for the status API.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::admin::AdminState;

/// Reject requests without `Authorization: Bearer <api_key>` when a key is set.
pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if presented == Some(key) {
        Ok(next.run(request).await)
    } else {
        tracing::debug!("Status API request rejected: missing or wrong key");
        Err(StatusCode::UNAUTHORIZED)
    }
}
