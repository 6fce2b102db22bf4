//! `review` capability (spec §4.5/§4.11): request, approve, reject, merge,
//! rebase. These are the client-driven counterparts of the moves the
//! automation orchestrator makes on its own when `auto_review` is set —
//! same storage calls and events, triggered manually instead of by a
//! parsed `<approve/>`/`<reject/>` signal.

use super::{DispatchContext, DispatchError, HandlerResult, optional_str, require_str};
use kagan_common::{DomainEvent, TaskStatus};
use serde_json::{Map, Value};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "request" => request(ctx, params).await,
        "approve" => approve(ctx, params).await,
        "reject" => reject(ctx, params).await,
        "merge" => merge(ctx, params).await,
        "rebase" => rebase(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "review".to_string(),
            method: other.to_string(),
        }),
    }
}

fn publish_status_change(ctx: &DispatchContext, task_id: &str, from: TaskStatus, to: TaskStatus, reason: &str) {
    ctx.events.publish(DomainEvent::TaskStatusChanged {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task_id.to_string(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
        reason: reason.to_string(),
    });
}

async fn request(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let (task, from) = ctx.storage.move_task(task_id, TaskStatus::Review, Some("review requested"))?;
    publish_status_change(ctx, task_id, from, TaskStatus::Review, "review requested");
    ctx.registry.request_review(task_id);
    let mut result = Map::new();
    result.insert("task".to_string(), serde_json::to_value(task).unwrap_or(Value::Null));
    Ok(result)
}

/// Per workspace repo: fetch/checkout/merge against the target branch
/// (spec §4.11 "Merge"). A conflict on any repo blocks the task and stops
/// iterating further repos rather than leaving a partial merge.
async fn merge_workspace_repos(ctx: &DispatchContext, task_id: &str) -> Result<Vec<kagan_common::Merge>, DispatchError> {
    let workspace = ctx
        .storage
        .active_workspace_for_task(task_id)?
        .ok_or_else(|| DispatchError::NotFound(format!("no active workspace for task {task_id}")))?;
    let repos = ctx.storage.workspace_repos(&workspace.id)?;
    let mut merges = Vec::new();
    for repo in repos {
        let repo_record = ctx.storage.get_repo(&repo.repo_id)?;
        let repo_path = std::path::PathBuf::from(&repo_record.path);
        let outcome =
            crate::merge::merge_into_target(&repo_path, &workspace.branch_name, &repo.target_branch).await;
        match outcome {
            Ok(result) => {
                let merge = ctx.storage.create_merge(
                    &workspace.id,
                    &repo.repo_id,
                    kagan_common::MergeType::Direct,
                    &repo.target_branch,
                )?;
                ctx.storage.record_merge_commit(&merge.id, &result.merge_commit)?;
                ctx.events.publish(DomainEvent::MergeCompleted {
                    event_id: kagan_common::new_id(),
                    occurred_at: chrono::Utc::now(),
                    workspace_id: workspace.id.clone(),
                    repo_id: repo.repo_id.clone(),
                    target: repo.target_branch.clone(),
                    merge_commit: result.merge_commit,
                });
                merges.push(ctx.storage.get_merge(&merge.id)?);
                // record_merge_commit doesn't return the updated row; re-fetch.
            }
            Err(crate::merge::MergeError::Conflict { files }) => {
                ctx.events.publish(DomainEvent::MergeFailed {
                    event_id: kagan_common::new_id(),
                    occurred_at: chrono::Utc::now(),
                    workspace_id: workspace.id.clone(),
                    repo_id: repo.repo_id.clone(),
                    error: "merge conflict".to_string(),
                    conflict_files: files.clone(),
                });
                ctx.storage.append_scratch(
                    task_id,
                    &format!("## Merge conflict\nrepo {}: {}", repo.repo_id, files.join(", ")),
                )?;
                ctx.registry.mark_blocked(task_id, "merge conflict");
                return Err(DispatchError::Merge(crate::merge::MergeError::Conflict { files }));
            }
            Err(other) => return Err(DispatchError::Merge(other)),
        }
    }
    Ok(merges)
}

async fn approve(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let summary = optional_str(params, "summary").unwrap_or("approved");
    ctx.storage.append_scratch(task_id, &format!("## Review\nAPPROVED: {summary}"))?;

    let merges = merge_workspace_repos(ctx, task_id).await?;

    let (task, from) = ctx.storage.move_task(task_id, TaskStatus::Done, Some("review approved"))?;
    publish_status_change(ctx, task_id, from, TaskStatus::Done, "review approved");
    ctx.registry.end(task_id);

    let mut result = Map::new();
    result.insert("task".to_string(), serde_json::to_value(task).unwrap_or(Value::Null));
    result.insert("merges".to_string(), serde_json::to_value(merges).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn reject(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let reason = optional_str(params, "reason").unwrap_or("rejected");
    ctx.storage.append_scratch(task_id, &format!("## Review\nREJECTED: {reason}"))?;
    let (task, from) = ctx.storage.move_task(task_id, TaskStatus::InProgress, Some(reason))?;
    publish_status_change(ctx, task_id, from, TaskStatus::InProgress, reason);
    ctx.registry.end(task_id);
    let mut result = Map::new();
    result.insert("task".to_string(), serde_json::to_value(task).unwrap_or(Value::Null));
    Ok(result)
}

/// Direct merge without a status transition check — spec §4.11 calls this
/// out separately from the approve flow ("or when a client calls
/// `review.merge`").
async fn merge(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let merges = merge_workspace_repos(ctx, task_id).await?;
    let mut result = Map::new();
    result.insert("merges".to_string(), serde_json::to_value(merges).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn rebase(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let task_id = require_str(params, "task_id")?;
    let workspace = ctx
        .storage
        .active_workspace_for_task(task_id)?
        .ok_or_else(|| DispatchError::NotFound(format!("no active workspace for task {task_id}")))?;
    let repos = ctx.storage.workspace_repos(&workspace.id)?;
    for repo in &repos {
        let repo_record = ctx.storage.get_repo(&repo.repo_id)?;
        let repo_path = std::path::PathBuf::from(&repo_record.path);
        crate::merge::rebase_onto_target(&repo_path, &repo.target_branch)
            .await
            .map_err(DispatchError::Merge)?;
    }
    let mut result = Map::new();
    result.insert("rebased_repos".to_string(), Value::from(repos.len() as i64));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;
    use kagan_common::{Priority, TaskType};

    async fn task_in_review(ctx: &DispatchContext) -> kagan_common::Task {
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
        ctx.storage.move_task(&task.id, TaskStatus::InProgress, None).unwrap();
        ctx.storage.move_task(&task.id, TaskStatus::Review, None).unwrap();
        ctx.storage.get_task(&task.id).unwrap()
    }

    #[tokio::test]
    async fn reject_returns_task_to_in_progress() {
        let ctx = context();
        let task = task_in_review(&ctx).await;
        let mut params = Map::new();
        params.insert("task_id".to_string(), Value::String(task.id.clone()));
        params.insert("reason".to_string(), Value::String("needs more work".to_string()));
        let result = reject(&ctx, &params).await.unwrap();
        assert_eq!(result["task"]["status"], "in_progress");
        let scratch = ctx.storage.get_scratch(&task.id).unwrap();
        assert!(scratch.contains("needs more work"));
    }

    #[tokio::test]
    async fn approve_without_workspace_is_not_found() {
        let ctx = context();
        let task = task_in_review(&ctx).await;
        let mut params = Map::new();
        params.insert("task_id".to_string(), Value::String(task.id));
        let err = approve(&ctx, &params).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn request_moves_backlog_incapable_task_to_review_only_from_in_progress() {
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
        let err = request(&ctx, &params).await.unwrap_err();
        assert_eq!(err.error_code().as_str(), "VALIDATION_ERROR");
    }
}
