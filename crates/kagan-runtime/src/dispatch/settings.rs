//! `settings` capability (spec §4.5): get, update — orchestrator knobs
//! backed by the `settings` table (spec §4.11's `AutomationConfig` reads
//! these same keys at startup).

use super::{DispatchContext, DispatchError, HandlerResult, optional_str, require_str};
use serde_json::{Map, Value};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "get" => get(ctx, params).await,
        "update" => update(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "settings".to_string(),
            method: other.to_string(),
        }),
    }
}

/// With a `key` param: `{"key", "value"}` for that single setting. Without
/// one: every stored override as `{"settings": {key: value, ...}}` — this
/// intentionally omits keys that still sit on their hardcoded default and
/// were never written, since `list_settings` only reads the table.
async fn get(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let mut result = Map::new();
    match optional_str(params, "key") {
        Some(key) => {
            let value = ctx.storage.get_setting(key)?.unwrap_or(Value::Null);
            result.insert("key".to_string(), Value::String(key.to_string()));
            result.insert("value".to_string(), value);
        }
        None => {
            let settings: Map<String, Value> = ctx.storage.list_settings()?.into_iter().collect();
            result.insert("settings".to_string(), Value::Object(settings));
        }
    }
    Ok(result)
}

async fn update(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let key = require_str(params, "key")?;
    let value = params
        .get("value")
        .ok_or_else(|| DispatchError::Validation("missing required param `value`".to_string()))?;
    ctx.storage.update_setting(key, value)?;
    let mut result = Map::new();
    result.insert("key".to_string(), Value::String(key.to_string()));
    result.insert("value".to_string(), value.clone());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    #[tokio::test]
    async fn get_unset_key_falls_back_to_default() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("key".to_string(), Value::String("max_concurrent_agents".to_string()));
        let result = get(&ctx, &params).await.unwrap();
        assert_eq!(result["value"], 2);
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("key".to_string(), Value::String("max_concurrent_agents".to_string()));
        params.insert("value".to_string(), Value::from(8));
        update(&ctx, &params).await.unwrap();

        let mut get_params = Map::new();
        get_params.insert("key".to_string(), Value::String("max_concurrent_agents".to_string()));
        let result = get(&ctx, &get_params).await.unwrap();
        assert_eq!(result["value"], 8);
    }
}
