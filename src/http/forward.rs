//! One forwarding attempt to one backend.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::header;
use url::Url;

use crate::health::probe::transport_failure;
use crate::health::state::FailureReason;
use crate::http::request::X_REQUEST_ID;
use crate::http::response::UpstreamResponse;

/// POST `body` to `url` and read the whole answer within `timeout`.
///
/// The deadline covers connect, request and response body. When it fires
/// only this in-flight call is dropped; the caller decides what comes next.
pub async fn forward_once(
    client: &reqwest::Client,
    url: &Url,
    body: Bytes,
    request_id: Option<&str>,
    timeout: Duration,
) -> Result<UpstreamResponse, FailureReason> {
    let start = Instant::now();
    let call = async {
        let mut request = client
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(id) = request_id {
            request = request.header(X_REQUEST_ID, id);
        }

        let response = request.send().await.map_err(transport_failure)?;
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(transport_failure)?;
        Ok::<_, FailureReason>(UpstreamResponse {
            status,
            content_type,
            body,
            latency: start.elapsed(),
        })
    };

    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(FailureReason::Timeout))
}
