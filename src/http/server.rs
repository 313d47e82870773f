//! HTTP server setup and request handlers.
//!
//! # Responsibilities
//! - Create Axum Router with the JSON-RPC and WebSocket handlers
//! - Wire up middleware (tracing, body limit, request ID)
//! - Select a backend per attempt, forward, retry on backend faults
//! - Feed every attempt outcome into backend health
//!
//! # Design Decisions
//! - A call captures one registry snapshot and uses it for all its attempts
//! - Retries go to backends not tried yet for the same call, without delay
//! - One failed attempt records exactly one failure against its backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::health::passive;
use crate::health::state::FailureReason;
use crate::http::forward::forward_once;
use crate::http::frontend::{FrontEndCommand, SessionDrift};
use crate::http::request::{RpcEnvelope, X_REQUEST_ID};
use crate::http::response::ProxyError;
use crate::http::websocket::{run_session, UpstreamSocket};
use crate::lifecycle::mailbox::MailboxSender;
use crate::lifecycle::shutdown::ShutdownListener;
use crate::load_balancer::{select, SelectionFilter};
use crate::observability::metrics;
use crate::registry::BackendDescriptor;
use crate::resilience::retries::{classify_status, Verdict};
use crate::state::{CallOutcome, SharedState};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
    /// Upstream client of the front-end, separate from the probe client.
    pub client: reqwest::Client,
    /// Mailbox of the front-end task that owns session teardown.
    pub frontend: MailboxSender<SessionDrift, FrontEndCommand>,
    pub shutdown: ShutdownListener,
}

impl AppState {
    pub fn new(
        shared: Arc<SharedState>,
        frontend: MailboxSender<SessionDrift, FrontEndCommand>,
        shutdown: ShutdownListener,
    ) -> Result<Self, reqwest::Error> {
        let timeouts = &shared.settings.timeouts;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(timeouts.connect_ms))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            shared,
            client,
            frontend,
            shutdown,
        })
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.shared.settings.timeouts.request_ms)
    }

    fn max_attempts(&self) -> u32 {
        self.shared.settings.retries.max_attempts.max(1)
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.shared.settings.listener.max_body_size;
    Router::new()
        .route("/", get(ws_handler).post(rpc_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
}

/// JSON-RPC over HTTP.
async fn rpc_handler(State(app): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let shared = &app.shared;
    let envelope = RpcEnvelope::peek(&body);
    let request_id = headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok());

    let registry = shared.registry.current();
    if !registry.proxy_enabled {
        return reject(shared, ProxyError::ProxyDisabled, envelope, start);
    }

    let mut tried: Vec<String> = Vec::new();
    let mut last_failure = None;

    for attempt in 1..=app.max_attempts() {
        let filter = SelectionFilter {
            exclude: &tried,
            require_ws: false,
        };
        let Ok(candidate) = select(shared, &registry, &filter).await else {
            break;
        };
        let backend = candidate.backend;

        tracing::debug!(
            request_id,
            method = envelope.method(),
            backend = %backend.alias,
            attempt,
            "Forwarding call"
        );

        let reason = match forward_once(&app.client, &backend.rpc, body.clone(), request_id, app.request_timeout()).await {
            Ok(upstream) => match classify_status(upstream.status) {
                Verdict::Deliver => {
                    passive::record_success(shared, &backend.alias, upstream.latency).await;
                    shared.activity.served_by(&backend.alias);
                    let outcome = CallOutcome::Served { attempts: attempt };
                    shared.activity.record(outcome);
                    metrics::record_request(&backend.alias, outcome.label(), start);
                    return upstream.into_response();
                }
                Verdict::ClientError => {
                    shared.activity.record(CallOutcome::BadRequest);
                    metrics::record_request(&backend.alias, CallOutcome::BadRequest.label(), start);
                    return upstream.into_response();
                }
                Verdict::BackendFault => FailureReason::HttpStatus(upstream.status.as_u16()),
            },
            Err(reason) => reason,
        };

        tracing::warn!(
            request_id,
            method = envelope.method(),
            backend = %backend.alias,
            attempt,
            reason = %reason,
            "Forwarding attempt failed"
        );
        passive::record_failure(shared, &app.frontend, &backend.alias, reason.clone()).await;
        tried.push(backend.alias.clone());
        last_failure = Some(reason);
    }

    let error = match last_failure {
        None => ProxyError::NoBackendAvailable,
        Some(last) => ProxyError::RetriesExhausted {
            attempts: tried.len() as u32,
            last,
        },
    };
    reject(shared, error, envelope, start)
}

fn reject(shared: &SharedState, error: ProxyError, envelope: RpcEnvelope, start: Instant) -> Response {
    let outcome = match error {
        ProxyError::NoBackendAvailable => CallOutcome::NoBackend,
        ProxyError::RetriesExhausted { .. } => CallOutcome::RetriesExhausted,
        ProxyError::ProxyDisabled => CallOutcome::ProxyDisabled,
    };
    shared.activity.record(outcome);
    metrics::record_request("none", outcome.label(), start);
    tracing::warn!(method = envelope.method(), error = %error, "Call rejected by proxy");
    error.into_rpc_response(envelope.id)
}

/// WebSocket upgrade on `GET /`.
///
/// The upstream connection is established before accepting the upgrade, so
/// a failing backend can still be retried on another one.
async fn ws_handler(State(app): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let shared = app.shared.clone();
    let registry = shared.registry.current();
    if !registry.proxy_enabled {
        return ProxyError::ProxyDisabled.into_response();
    }

    let mut tried: Vec<String> = Vec::new();
    let mut last_failure = None;

    for _ in 0..app.max_attempts() {
        let filter = SelectionFilter {
            exclude: &tried,
            require_ws: true,
        };
        let Ok(candidate) = select(&shared, &registry, &filter).await else {
            break;
        };
        let backend = candidate.backend;

        match connect_upstream(&backend, app.request_timeout()).await {
            Ok(upstream) => {
                let alias = backend.alias.clone();
                let app = app.clone();
                return upgrade.on_upgrade(move |socket| run_session(socket, upstream, alias, app));
            }
            Err(reason) => {
                tracing::warn!(backend = %backend.alias, reason = %reason, "WebSocket connect failed");
                passive::record_failure(&shared, &app.frontend, &backend.alias, reason.clone()).await;
                tried.push(backend.alias.clone());
                last_failure = Some(reason);
            }
        }
    }

    match last_failure {
        None => ProxyError::NoBackendAvailable.into_response(),
        Some(last) => ProxyError::RetriesExhausted {
            attempts: tried.len() as u32,
            last,
        }
        .into_response(),
    }
}

async fn connect_upstream(backend: &BackendDescriptor, timeout: Duration) -> Result<UpstreamSocket, FailureReason> {
    let Some(url) = &backend.ws else {
        return Err(FailureReason::Connection("no websocket endpoint".to_string()));
    };
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str())).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => Err(FailureReason::Connection(e.to_string())),
        Err(_) => Err(FailureReason::Timeout),
    }
}
