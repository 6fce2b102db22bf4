//! `tasks` capability (spec §4.5): get, list, search, scratchpad, context,
//! logs, wait, create, update, move, delete, update_scratchpad.

use super::{
    DispatchContext, DispatchError, HandlerResult, optional_bool, optional_str, optional_string_array, optional_u64,
    require_str,
};
use kagan_common::{DomainEvent, Priority, TaskStatus, TaskType};
use serde_json::{Map, Value, json};
use tokio::time::Duration;

fn parse_priority(raw: Option<&str>) -> Priority {
    match raw {
        Some("low") => Priority::Low,
        Some("high") => Priority::High,
        _ => Priority::Medium,
    }
}

fn parse_task_type(raw: Option<&str>) -> TaskType {
    match raw {
        Some("pair") => TaskType::Pair,
        _ => TaskType::Auto,
    }
}

fn parse_status(raw: &str) -> Result<TaskStatus, DispatchError> {
    TaskStatus::from_str(raw).map_err(DispatchError::Validation)
}

fn task_to_value(task: &kagan_common::Task) -> Value {
    serde_json::to_value(task).unwrap_or(Value::Null)
}

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "get" => get(ctx, params).await,
        "list" => list(ctx, params).await,
        "search" => search(ctx, params).await,
        "scratchpad" => scratchpad(ctx, params).await,
        "context" => context(ctx, params).await,
        "logs" => logs(ctx, params).await,
        "wait" => wait(ctx, params).await,
        "create" => create(ctx, params).await,
        "update" => update(ctx, params).await,
        "move" => move_task(ctx, params).await,
        "delete" => delete(ctx, params).await,
        "update_scratchpad" => update_scratchpad(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "tasks".to_string(),
            method: other.to_string(),
        }),
    }
}

async fn get(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let task = ctx.storage.get_task(task_id)?;
    let mut result = Map::new();
    result.insert("task".to_string(), task_to_value(&task));
    Ok(result)
}

async fn list(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = optional_str(params, "project_id");
    let tasks = ctx.storage.list_tasks(project_id)?;
    let mut result = Map::new();
    result.insert("tasks".to_string(), serde_json::to_value(tasks).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn search(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let query = require_str(params, "query")?;
    let tasks = ctx.storage.search_tasks(query)?;
    let mut result = Map::new();
    result.insert("tasks".to_string(), serde_json::to_value(tasks).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn scratchpad(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let content = ctx.storage.get_scratch(task_id)?;
    let mut result = Map::new();
    result.insert("content".to_string(), Value::String(content));
    Ok(result)
}

async fn update_scratchpad(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let content = require_str(params, "content")?;
    let append = optional_bool(params, "append").unwrap_or(false);
    let scratch = if append {
        ctx.storage.append_scratch(task_id, content)?
    } else {
        ctx.storage.upsert_scratch(task_id, content)?
    };
    let mut result = Map::new();
    result.insert("content".to_string(), Value::String(scratch.content));
    Ok(result)
}

/// Aggregate dashboard view: task row, runtime snapshot, active workspace
/// (if any), and the queued-message status for its implementation lane —
/// everything a client needs to render one task without four round trips.
async fn context(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let task = ctx.storage.get_task(task_id)?;
    let runtime = ctx.registry.snapshot_for_task(task_id);
    let workspace = ctx.storage.active_workspace_for_task(task_id)?;
    let queue_status = ctx.queued_messages.get_status(task_id, kagan_common::Lane::Implementation);

    let mut result = Map::new();
    result.insert("task".to_string(), task_to_value(&task));
    result.insert("runtime".to_string(), serde_json::to_value(runtime).unwrap_or(Value::Null));
    result.insert(
        "workspace".to_string(),
        workspace.map(|w| serde_json::to_value(w).unwrap_or(Value::Null)).unwrap_or(Value::Null),
    );
    result.insert("queued_messages".to_string(), serde_json::to_value(queue_status).unwrap_or(Value::Null));
    Ok(result)
}

/// Returns the execution log for `execution_id`, or the task's most
/// recent execution if omitted.
async fn logs(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let _task_id = require_str(params, "task_id")?;
    let execution_id = require_str(params, "execution_id")?.to_string();
    let content = ctx.storage.read_execution_log(&execution_id)?;
    let mut result = Map::new();
    result.insert("execution_id".to_string(), Value::String(execution_id));
    result.insert("content".to_string(), Value::String(content));
    Ok(result)
}

/// Polls the runtime registry until the task leaves RUNNING/REVIEWING or
/// `timeout_seconds` elapses (default 30s), mirroring the job service's
/// `wait` shape (spec §4.16) for tasks that have no job record of their own.
async fn wait(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let timeout_seconds = optional_u64(params, "timeout_seconds").unwrap_or(30);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
    let mut timed_out = false;
    loop {
        let snapshot = ctx.registry.snapshot_for_task(task_id);
        let running = matches!(
            snapshot.phase,
            Some(kagan_common::RuntimePhase::Running) | Some(kagan_common::RuntimePhase::Reviewing)
        );
        if !running {
            let mut result = Map::new();
            result.insert("runtime".to_string(), serde_json::to_value(snapshot).unwrap_or(Value::Null));
            result.insert("timed_out".to_string(), Value::Bool(timed_out));
            return Ok(result);
        }
        if tokio::time::Instant::now() >= deadline {
            timed_out = true;
            let mut result = Map::new();
            result.insert("runtime".to_string(), serde_json::to_value(snapshot).unwrap_or(Value::Null));
            result.insert("timed_out".to_string(), Value::Bool(timed_out));
            return Ok(result);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn create(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = require_str(params, "project_id")?;
    let title = require_str(params, "title")?;
    let description = optional_str(params, "description").unwrap_or("");
    let priority = parse_priority(optional_str(params, "priority"));
    let task_type = parse_task_type(optional_str(params, "task_type"));
    let assigned_hat = optional_str(params, "assigned_hat");
    let agent_backend = optional_str(params, "agent_backend");
    let base_branch = optional_str(params, "base_branch");
    let acceptance_criteria = optional_string_array(params, "acceptance_criteria").unwrap_or_default();

    let task = ctx.storage.create_task(crate::storage::NewTask {
        project_id,
        title,
        description,
        priority,
        task_type,
        assigned_hat,
        agent_backend,
        base_branch,
        acceptance_criteria,
    })?;

    ctx.events.publish(DomainEvent::TaskCreated {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task.id.clone(),
        project_id: project_id.to_string(),
    });

    let mut result = Map::new();
    result.insert("task".to_string(), task_to_value(&task));
    Ok(result)
}

async fn update(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let priority = optional_str(params, "priority").map(|p| parse_priority(Some(p)));
    let acceptance_criteria = optional_string_array(params, "acceptance_criteria");

    let (task, changed) = ctx.storage.update_task(
        task_id,
        crate::storage::TaskUpdate {
            title: optional_str(params, "title"),
            description: optional_str(params, "description"),
            priority,
            assigned_hat: optional_str(params, "assigned_hat"),
            agent_backend: optional_str(params, "agent_backend"),
            base_branch: optional_str(params, "base_branch"),
            acceptance_criteria,
        },
    )?;

    if !changed.is_empty() {
        ctx.events.publish(DomainEvent::TaskUpdated {
            event_id: kagan_common::new_id(),
            occurred_at: chrono::Utc::now(),
            task_id: task.id.clone(),
            changed_fields: changed.iter().map(|s| s.to_string()).collect(),
        });
    }

    let mut result = Map::new();
    result.insert("task".to_string(), task_to_value(&task));
    result.insert("changed_fields".to_string(), json!(changed));
    Ok(result)
}

async fn move_task(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let to = parse_status(require_str(params, "to")?)?;
    let reason = optional_str(params, "reason");

    let (task, from) = ctx.storage.move_task(task_id, to, reason)?;

    ctx.events.publish(DomainEvent::TaskStatusChanged {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task.id.clone(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
        reason: reason.unwrap_or_default().to_string(),
    });

    let mut result = Map::new();
    result.insert("task".to_string(), task_to_value(&task));
    Ok(result)
}

async fn delete(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    ctx.storage.delete_task(task_id)?;
    ctx.events.publish(DomainEvent::TaskDeleted {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task_id.to_string(),
    });
    let mut result = Map::new();
    result.insert("deleted".to_string(), Value::Bool(true));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let ctx = context();
        let project = ctx.storage.create_project("P", None).unwrap();
        let mut params = Map::new();
        params.insert("project_id".to_string(), Value::String(project.id.clone()));
        params.insert("title".to_string(), Value::String("Rename foo".to_string()));
        let created = create(&ctx, &params).await.unwrap();
        let task_id = created["task"]["id"].as_str().unwrap().to_string();

        let mut get_params = Map::new();
        get_params.insert("task_id".to_string(), Value::String(task_id));
        let fetched = get(&ctx, &get_params).await.unwrap();
        assert_eq!(fetched["task"]["title"], "Rename foo");
    }

    #[tokio::test]
    async fn move_rejects_illegal_transition() {
        let ctx = context();
        let project = ctx.storage.create_project("P", None).unwrap();
        let task = ctx
            .storage
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
            .unwrap();
        let mut params = Map::new();
        params.insert("task_id".to_string(), Value::String(task.id));
        params.insert("to".to_string(), Value::String("done".to_string()));
        let err = move_task(&ctx, &params).await.unwrap_err();
        assert_eq!(err.error_code().as_str(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_required_param_is_validation_error() {
        let ctx = context();
        let err = get(&ctx, &Map::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }
}
