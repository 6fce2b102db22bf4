//! `jobs` capability (spec §4.5/§4.16): submit, cancel, get, wait, events —
//! thin wrappers over `JobService`, which owns the actual lifecycle.

use super::{DispatchContext, DispatchError, HandlerResult, optional_u64, require_str};
use serde_json::{Map, Value, json};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "submit" => submit(ctx, params).await,
        "cancel" => cancel(ctx, params).await,
        "get" => get(ctx, params).await,
        "wait" => wait(ctx, params).await,
        "events" => events(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "jobs".to_string(),
            method: other.to_string(),
        }),
    }
}

fn record_to_value(record: kagan_common::JobRecord) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

async fn submit(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let action = require_str(params, "action")?;
    let job_params = params.get("params").cloned().unwrap_or(Value::Object(Map::new()));
    let record = ctx
        .jobs
        .submit(&ctx.storage, &ctx.registry, &ctx.events, task_id, action, job_params)
        .await?;
    let mut result = Map::new();
    result.insert("job".to_string(), record_to_value(record));
    Ok(result)
}

async fn cancel(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let job_id = require_str(params, "job_id")?;
    let record = ctx.jobs.cancel(job_id).await?;
    let mut result = Map::new();
    result.insert("job".to_string(), record_to_value(record));
    Ok(result)
}

async fn get(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let job_id = require_str(params, "job_id")?;
    let record = ctx.jobs.try_get(job_id).await?;
    let mut result = Map::new();
    result.insert("job".to_string(), record_to_value(record));
    Ok(result)
}

async fn wait(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let job_id = require_str(params, "job_id")?;
    let timeout_seconds = optional_u64(params, "timeout_seconds").unwrap_or(30);
    let (record, timed_out) = ctx.jobs.wait(job_id, timeout_seconds).await?;
    let mut result = Map::new();
    result.insert("job".to_string(), record_to_value(record));
    result.insert("timed_out".to_string(), json!(timed_out));
    Ok(result)
}

async fn events(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let job_id = require_str(params, "job_id")?;
    let offset = optional_u64(params, "offset").unwrap_or(0) as usize;
    let limit = optional_u64(params, "limit").unwrap_or(100) as usize;
    let events = ctx.jobs.events(job_id, offset, limit).await?;
    let mut result = Map::new();
    result.insert("events".to_string(), serde_json::to_value(events).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;
    use kagan_common::{Priority, TaskType};

    async fn auto_task(ctx: &DispatchContext) -> kagan_common::Task {
        let project = ctx.storage.create_project("P", None).unwrap();
        ctx.storage
            .create_task(crate::storage::NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap()
    }

    #[tokio::test]
    async fn submit_then_get_round_trips() {
        let ctx = context();
        let task = auto_task(&ctx).await;
        let mut params = Map::new();
        params.insert("task_id".to_string(), Value::String(task.id.clone()));
        params.insert("action".to_string(), Value::String("start_agent".to_string()));
        let submitted = submit(&ctx, &params).await.unwrap();
        let job_id = submitted["job"]["job_id"].as_str().unwrap().to_string();

        let mut get_params = Map::new();
        get_params.insert("job_id".to_string(), Value::String(job_id));
        let fetched = get(&ctx, &get_params).await.unwrap();
        assert_eq!(fetched["job"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("job_id".to_string(), Value::String("nope".to_string()));
        let err = get(&ctx, &params).await.unwrap_err();
        assert_eq!(err.error_code().as_str(), "JOB_NOT_FOUND");
    }
}
