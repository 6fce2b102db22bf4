//! `sessions` capability (spec §4.5/§4.8): create, attach, exists, kill.
//!
//! A `Session` here is the storage-layer record (ACP or terminal-attach)
//! described in §4.8, not the PTY itself (§4.13 owns that). `attach`
//! resolves the record for a reconnecting client; spawning an actual
//! supervisor/PTY for it is a transport-layer concern above this capability.

use super::{DispatchContext, DispatchError, HandlerResult, optional_str, require_str};
use kagan_common::SessionType;
use serde_json::{Map, Value, json};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "create" => create(ctx, params).await,
        "attach" => attach(ctx, params).await,
        "exists" => exists(ctx, params).await,
        "kill" => kill(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "sessions".to_string(),
            method: other.to_string(),
        }),
    }
}

fn parse_session_type(raw: &str) -> Result<SessionType, DispatchError> {
    SessionType::from_str(raw).map_err(DispatchError::Validation)
}

async fn create(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let workspace_id = require_str(params, "workspace_id")?;
    let session_type = parse_session_type(require_str(params, "session_type")?)?;
    let external_id = optional_str(params, "external_id");
    let session = ctx.storage.create_session(workspace_id, session_type, external_id)?;
    let mut result = Map::new();
    result.insert("session".to_string(), serde_json::to_value(session).unwrap_or(Value::Null));
    Ok(result)
}

async fn attach(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let session_id = require_str(params, "session_id")?;
    let session = ctx.storage.get_session(session_id)?;
    if session.status != kagan_common::SessionStatus::Active {
        return Err(DispatchError::Validation(format!("session {session_id} is not active")));
    }
    let mut result = Map::new();
    result.insert("session".to_string(), serde_json::to_value(session).unwrap_or(Value::Null));
    Ok(result)
}

async fn exists(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let session_id = require_str(params, "session_id")?;
    let exists = ctx.storage.session_exists(session_id)?;
    let mut result = Map::new();
    result.insert("exists".to_string(), json!(exists));
    Ok(result)
}

async fn kill(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let session_id = require_str(params, "session_id")?;
    ctx.storage.close_session(session_id)?;
    let mut result = Map::new();
    result.insert("killed".to_string(), json!(true));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    async fn workspace(ctx: &DispatchContext) -> kagan_common::Workspace {
        let project = ctx.storage.create_project("P", None).unwrap();
        ctx.storage.create_workspace(&project.id, None, "kagan/t1", "/tmp/w").unwrap()
    }

    #[tokio::test]
    async fn create_then_attach_round_trips() {
        let ctx = context();
        let ws = workspace(&ctx).await;
        let mut params = Map::new();
        params.insert("workspace_id".to_string(), Value::String(ws.id.clone()));
        params.insert("session_type".to_string(), Value::String("acp".to_string()));
        let created = create(&ctx, &params).await.unwrap();
        let session_id = created["session"]["id"].as_str().unwrap().to_string();

        let mut attach_params = Map::new();
        attach_params.insert("session_id".to_string(), Value::String(session_id));
        let attached = attach(&ctx, &attach_params).await.unwrap();
        assert_eq!(attached["session"]["status"], "active");
    }

    #[tokio::test]
    async fn kill_then_attach_fails() {
        let ctx = context();
        let ws = workspace(&ctx).await;
        let session = ctx.storage.create_session(&ws.id, SessionType::Acp, None).unwrap();

        let mut kill_params = Map::new();
        kill_params.insert("session_id".to_string(), Value::String(session.id.clone()));
        kill(&ctx, &kill_params).await.unwrap();

        let mut attach_params = Map::new();
        attach_params.insert("session_id".to_string(), Value::String(session.id));
        let err = attach(&ctx, &attach_params).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn exists_is_false_for_unknown_session() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("session_id".to_string(), Value::String("nope".to_string()));
        let result = exists(&ctx, &params).await.unwrap();
        assert_eq!(result["exists"], false);
    }
}
