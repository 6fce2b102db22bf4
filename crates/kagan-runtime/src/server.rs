//! IPC Server (spec §4.4): one cooperative task per connection, reading
//! newline-delimited `CoreRequest` envelopes and writing back `CoreResponse`
//! envelopes in arrival order. Transport-agnostic over anything implementing
//! [`transport::Connection`].

use crate::dispatch::{self, DispatchContext};
use crate::transport::Connection;
use futures_util::{SinkExt, StreamExt};
use kagan_wire::{CoreRequest, CoreResponse, ErrorCode, LineJsonCodec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::codec::Framed;

/// Active-connection counter for idle-shutdown logic (spec §4.4's
/// `on_client_connect`/`on_client_disconnect`).
#[derive(Default)]
pub struct ConnectionTracker {
    active: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    fn on_connect(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Constant-time comparison of the client-supplied bearer token against the
/// server's token (spec §4.4: "compares it to the server token in constant
/// time"). `subtle` isn't in the dependency set, so this XOR-accumulates
/// over the full length of both sides regardless of where they first
/// differ.
fn tokens_match(expected: &str, actual: &str) -> bool {
    let expected = expected.as_bytes();
    let actual = actual.as_bytes();
    if expected.len() != actual.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(actual.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

fn parse_error_response(raw_line: &str) -> CoreResponse {
    let request_id = serde_json::from_str::<serde_json::Value>(raw_line)
        .ok()
        .and_then(|v| v.get("request_id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    CoreResponse::failure(request_id, ErrorCode::ParseError, "malformed request envelope".to_string())
}

fn auth_failed_response(request: &CoreRequest) -> CoreResponse {
    CoreResponse::failure(request.request_id.clone(), ErrorCode::AuthFailed, "bearer token mismatch".to_string())
}

/// Runs the read/respond loop for one connection until the client closes it
/// or sends a line exceeding `MAX_LINE_BYTES`. Never panics on malformed
/// input: parse failures and auth failures produce an error envelope and
/// keep the connection open, since spec §4.4 only calls out `request_id`
/// mismatches (not parse/auth failures) as hard protocol errors that close
/// the connection.
pub async fn handle_connection<C: Connection>(
    conn: C,
    ctx: Arc<DispatchContext>,
    server_token: Arc<str>,
    tracker: Arc<ConnectionTracker>,
) {
    tracker.on_connect();
    let mut framed = Framed::new(conn, LineJsonCodec::default());

    while let Some(line_result) = framed.next().await {
        let line = match line_result {
            Ok(line) => line,
            Err(_) => break,
        };

        let response = match serde_json::from_str::<CoreRequest>(&line) {
            Ok(request) => {
                if !tokens_match(&server_token, &request.bearer_token) {
                    auth_failed_response(&request)
                } else {
                    dispatch::dispatch(&ctx, request).await
                }
            }
            Err(_) => parse_error_response(&line),
        };

        let encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize CoreResponse");
                break;
            }
        };
        if framed.send(encoded).await.is_err() {
            break;
        }
    }

    tracker.on_disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_tokens_match() {
        assert!(tokens_match("abc123", "abc123"));
    }

    #[test]
    fn different_length_tokens_do_not_match() {
        assert!(!tokens_match("abc", "abcd"));
    }

    #[test]
    fn same_length_different_tokens_do_not_match() {
        assert!(!tokens_match("abc123", "abc124"));
    }

    #[test]
    fn parse_error_response_falls_back_to_unknown_request_id() {
        let response = parse_error_response("not json");
        assert_eq!(response.request_id, "unknown");
        assert_eq!(response.error.unwrap().code, "PARSE_ERROR");
    }

    #[test]
    fn parse_error_response_salvages_request_id_from_malformed_envelope() {
        let response = parse_error_response(r#"{"request_id": "req-9", "bogus": true}"#);
        assert_eq!(response.request_id, "req-9");
    }
}
