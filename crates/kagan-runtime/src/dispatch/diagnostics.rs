//! `diagnostics` capability (spec §4.5): instrumentation — surfaces the
//! `Instrumentation` snapshot over the wire for operator tooling.

use super::{DispatchContext, DispatchError, HandlerResult};
use serde_json::{Map, Value};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "instrumentation" => instrumentation(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "diagnostics".to_string(),
            method: other.to_string(),
        }),
    }
}

async fn instrumentation(ctx: &DispatchContext, _params: &Map<String, Value>) -> HandlerResult {
    let mut result = Map::new();
    result.insert("enabled".to_string(), Value::Bool(ctx.instrumentation.is_enabled()));
    result.insert(
        "timings".to_string(),
        serde_json::to_value(ctx.instrumentation.snapshot()).unwrap_or(Value::Object(Map::new())),
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    #[tokio::test]
    async fn disabled_instrumentation_reports_empty_timings() {
        let ctx = context();
        let result = instrumentation(&ctx, &Map::new()).await.unwrap();
        assert_eq!(result["enabled"], false);
        assert_eq!(result["timings"].as_object().unwrap().len(), 0);
    }
}
