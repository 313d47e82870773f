//! Proxy-generated responses.
//!
//! # Responsibilities
//! - Map proxy failures to JSON-RPC error objects and HTTP statuses
//! - Tag them so a client can tell them from upstream errors
//! - Rebuild an upstream answer for the client
//!
//! # Design Decisions
//! - Upstream answers are delivered verbatim (status, content type, body)
//! - Proxy errors carry `error.data.source = "proxy"` and the
//!   `x-link-proxy-error` header; upstream errors never do

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;

use crate::health::state::FailureReason;

/// Header set on every proxy-generated error.
pub const X_LINK_PROXY_ERROR: &str = "x-link-proxy-error";

/// A failure produced by the proxy itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("all {attempts} attempts failed, last: {last}")]
    RetriesExhausted { attempts: u32, last: FailureReason },

    #[error("proxy disabled")]
    ProxyDisabled,
}

impl ProxyError {
    pub fn code(&self) -> i64 {
        match self {
            ProxyError::NoBackendAvailable => -32090,
            ProxyError::RetriesExhausted { .. } => -32091,
            ProxyError::ProxyDisabled => -32093,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable | ProxyError::ProxyDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Value of the `x-link-proxy-error` header.
    pub fn tag(&self) -> &'static str {
        match self {
            ProxyError::NoBackendAvailable => "no-backend-available",
            ProxyError::RetriesExhausted { .. } => "retries-exhausted",
            ProxyError::ProxyDisabled => "proxy-disabled",
        }
    }

    /// Whether the client may succeed by retrying later.
    pub fn retryable(&self) -> bool {
        !matches!(self, ProxyError::ProxyDisabled)
    }

    /// JSON-RPC error object for the call identified by `id`.
    pub fn to_rpc(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "data": {
                    "source": "proxy",
                    "retryable": self.retryable(),
                },
            },
        })
    }

    pub fn into_rpc_response(self, id: Value) -> Response {
        let body = self.to_rpc(id).to_string();
        (
            self.status(),
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (
                    header::HeaderName::from_static(X_LINK_PROXY_ERROR),
                    HeaderValue::from_static(self.tag()),
                ),
            ],
            body,
        )
            .into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.into_rpc_response(Value::Null)
    }
}

/// A complete upstream answer.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
    pub latency: Duration,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}
