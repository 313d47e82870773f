//! Inbound request inspection.
//!
//! # Responsibilities
//! - Extract the JSON-RPC id and method for logs and proxy error answers
//! - Leave the body itself untouched: it is forwarded byte-for-byte
//!
//! # Design Decisions
//! - Inspection never rejects a request; malformed bodies are forwarded and
//!   the upstream answers them like any other JSON-RPC error

use serde::Deserialize;
use serde_json::Value;

/// Header carrying the request id, set by the request-id layer.
pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Deserialize)]
struct Call {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
}

/// What the proxy needs to know about a JSON-RPC payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    /// Id to echo in a proxy-generated error; `null` for batches and garbage.
    pub id: Value,
    /// Method name, or `"batch"` / `None`.
    pub method: Option<String>,
}

impl RpcEnvelope {
    pub fn peek(body: &[u8]) -> Self {
        if let Ok(call) = serde_json::from_slice::<Call>(body) {
            return Self {
                id: call.id,
                method: call.method,
            };
        }
        let is_batch = serde_json::from_slice::<Vec<Value>>(body).is_ok();
        Self {
            id: Value::Null,
            method: is_batch.then(|| "batch".to_string()),
        }
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("-")
    }
}
