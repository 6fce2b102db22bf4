//! `audit` capability (spec §4.5): list. Every dispatched request writes
//! its own entry (`dispatch::handle`), so this just reads them back.

use super::{DispatchContext, DispatchError, HandlerResult, optional_u64};
use serde_json::{Map, Value};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "list" => list(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "audit".to_string(),
            method: other.to_string(),
        }),
    }
}

async fn list(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let limit = optional_u64(params, "limit").unwrap_or(100) as u32;
    let entries = ctx.storage.list_audit(limit)?;
    let mut result = Map::new();
    result.insert("entries".to_string(), serde_json::to_value(entries).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    #[tokio::test]
    async fn list_returns_recorded_entries() {
        let ctx = context();
        ctx.storage.record_audit("sess-1", "tasks", "create", "ok").unwrap();
        let result = list(&ctx, &Map::new()).await.unwrap();
        let entries = result["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["method"], "create");
    }
}
