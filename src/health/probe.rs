//! JSON-RPC liveness probe.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use url::Url;

use crate::config::schema::HealthCheckConfig;
use crate::health::state::FailureReason;

/// Sends one cheap JSON-RPC call and judges the answer.
///
/// Owns its own HTTP client so probing keeps working when the front-end's
/// connection pool is saturated.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    body: Vec<u8>,
    timeout: Duration,
}

impl Prober {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("link-proxy-probe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": config.probe_method,
            "params": [],
        })
        .to_string()
        .into_bytes();

        Ok(Self { client, body, timeout })
    }

    /// Probe `url`, returning the round-trip time on success.
    pub async fn probe(&self, url: &Url) -> Result<Duration, FailureReason> {
        let start = Instant::now();
        let call = async {
            let response = self
                .client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(self.body.clone())
                .send()
                .await
                .map_err(transport_failure)?;

            let status = response.status();
            if !status.is_success() {
                return Err(FailureReason::HttpStatus(status.as_u16()));
            }
            let bytes = response.bytes().await.map_err(transport_failure)?;
            judge(&bytes)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => Ok(start.elapsed()),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err(FailureReason::Timeout),
        }
    }
}

/// Map a reqwest error onto a failure reason.
pub(crate) fn transport_failure(e: reqwest::Error) -> FailureReason {
    if e.is_timeout() {
        FailureReason::Timeout
    } else {
        FailureReason::Connection(e.to_string())
    }
}

fn judge(body: &[u8]) -> Result<(), FailureReason> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| FailureReason::InvalidResponse(e.to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(FailureReason::RpcError {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    if value.get("result").is_none() {
        return Err(FailureReason::InvalidResponse("missing result".to_string()));
    }
    Ok(())
}
