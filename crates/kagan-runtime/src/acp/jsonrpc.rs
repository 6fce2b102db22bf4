//! JSON-RPC 2.0 envelope and pending-call tracking (spec §4.12).
//!
//! Per spec.md §9 ("Weak collections for pending calls... a strongly-keyed
//! map plus explicit removal on future-drop or on response arrival is
//! sufficient"), pending calls live in a `DashMap<u64, oneshot::Sender<..>>`
//! keyed by a monotonically increasing call id, removed the moment a
//! response (or a connection-drop) resolves them — no separate GC pass
//! needed.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Error, Clone)]
#[error("rpc error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// An inbound line parses into either a response to one of our calls or a
/// request the peer is making of us.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

impl InboundEnvelope {
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }
}

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

#[derive(Clone)]
pub struct JsonRpcClient {
    next_id: Arc<AtomicU64>,
    pending: Arc<PendingMap>,
}

impl Default for JsonRpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcClient {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Builds the outgoing request and a receiver that resolves when
    /// `handle_response` observes a matching id.
    pub fn prepare_call(&self, method: &str, params: Value) -> (JsonRpcRequest, oneshot::Receiver<Result<Value, RpcError>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        (
            JsonRpcRequest {
                jsonrpc: "2.0",
                id,
                method: method.to_string(),
                params,
            },
            rx,
        )
    }

    /// Routes a response envelope to its caller. A response with no
    /// matching pending call (already dropped, or a duplicate) is ignored.
    pub fn handle_response(&self, id: u64, result: Option<Value>, error: Option<RpcErrorBody>) {
        if let Some((_, tx)) = self.pending.remove(&id) {
            let outcome = match error {
                Some(e) => Err(RpcError { code: e.code, message: e.message, data: e.data }),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_call_resolves_on_matching_response() {
        let client = JsonRpcClient::new();
        let (req, rx) = client.prepare_call("fs/read_text_file", serde_json::json!({"path": "x"}));
        client.handle_response(req.id, Some(serde_json::json!({"content": "hi"})), None);
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["content"], "hi");
    }

    #[tokio::test]
    async fn response_with_error_resolves_to_err() {
        let client = JsonRpcClient::new();
        let (req, rx) = client.prepare_call("terminal/create", Value::Null);
        client.handle_response(req.id, None, Some(RpcErrorBody { code: -32000, message: "nope".into(), data: None }));
        let result = rx.await.unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn unmatched_response_is_ignored() {
        let client = JsonRpcClient::new();
        client.handle_response(999, Some(Value::Null), None);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn call_ids_are_monotonically_increasing() {
        let client = JsonRpcClient::new();
        let (req1, _rx1) = client.prepare_call("m", Value::Null);
        let (req2, _rx2) = client.prepare_call("m", Value::Null);
        assert!(req2.id > req1.id);
    }
}
