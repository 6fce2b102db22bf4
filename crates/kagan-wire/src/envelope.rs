//! `CoreRequest` / `CoreResponse` — the typed envelope from spec §4.3.
//!
//! The source system used loose maps for `params`/`result`; here each is a
//! `serde_json::Map<String, Value>` at the envelope boundary, with
//! per-capability method structs doing the real typed extraction one layer
//! down (see `kagan-runtime::dispatch`).

use crate::error_code::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionProfile {
    Viewer,
    Planner,
    PairWorker,
    Operator,
    Maintainer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Legacy,
    Kagan,
    KaganAdmin,
    Tui,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreRequest {
    pub request_id: String,
    pub session_id: String,
    pub session_profile: SessionProfile,
    pub session_origin: SessionOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    pub capability: String,
    pub method: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub bearer_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl CoreResponse {
    pub fn success(request_id: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            result: None,
            error: Some(ResponseError::new(code, message)),
        }
    }

    /// `request_id` is unknown at the point a protocol-level error (e.g.
    /// an unparseable line) is raised; spec §4.4 says to echo "unknown" in
    /// that case.
    pub fn failure_unknown_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::failure("unknown", code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CoreRequest {
        let mut params = Map::new();
        params.insert("title".into(), Value::String("Rename foo to bar".into()));
        CoreRequest {
            request_id: "req-1".into(),
            session_id: "tui-42".into(),
            session_profile: SessionProfile::Operator,
            session_origin: SessionOrigin::Tui,
            client_version: Some("0.1.0".into()),
            capability: "tasks".into(),
            method: "create".into(),
            params,
            idempotency_key: Some("k1".into()),
            bearer_token: "deadbeef".into(),
        }
    }

    #[test]
    fn request_round_trips_through_json() {
        let req = sample_request();
        let json = serde_json::to_string(&req).unwrap();
        let back: CoreRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, req.request_id);
        assert_eq!(back.capability, "tasks");
        assert_eq!(back.params.get("title").unwrap(), "Rename foo to bar");
    }

    #[test]
    fn response_never_serializes_bearer_token_field() {
        // CoreResponse has no bearer_token field at all; verify the
        // serialized shape does not leak one even if someone naively
        // re-adds params to result.
        let resp = CoreResponse::success("req-1", Map::new());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("bearer_token"));
    }

    #[test]
    fn failure_sets_ok_false_and_omits_result() {
        let resp = CoreResponse::failure("req-1", ErrorCode::TaskNotFound, "no such task");
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, "TASK_NOT_FOUND");
    }

    #[test]
    fn unknown_request_id_used_for_pre_parse_failures() {
        let resp = CoreResponse::failure_unknown_request(ErrorCode::ParseError, "bad json");
        assert_eq!(resp.request_id, "unknown");
    }
}
