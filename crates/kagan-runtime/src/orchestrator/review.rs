//! Review agent flow (spec §4.11 "Review"): a second, read-only,
//! always-auto-approving agent in the same worktree, reviewing the diff
//! against the base branch.

use crate::acp::negotiation::initialize_params;
use crate::acp::registry::resolve_backend;
use crate::acp::supervisor::AgentSupervisor;
use crate::events::EventBus;
use crate::orchestrator::AutomationConfig;
use crate::orchestrator::prompt::build_review_prompt;
use crate::orchestrator::runner::collect_turn_output;
use crate::orchestrator::signals::{ReviewSignal, parse_review_signal};
use crate::orchestrator::OrchestratorError;
use crate::registry::SharedRegistry;
use crate::storage::Storage;
use kagan_common::{DomainEvent, RunReason, TaskStatus};
use serde_json::json;
use std::path::Path;
use tokio::time::Duration;

async fn diff_against_base(worktree_path: &Path, base_branch: &str) -> String {
    let output = tokio::process::Command::new("git")
        .args(["diff", &format!("{base_branch}...HEAD")])
        .current_dir(worktree_path)
        .output()
        .await;
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).to_string(),
        Err(_) => String::new(),
    }
}

pub async fn run_review_loop(
    storage: &Storage,
    registry: &SharedRegistry,
    events: &EventBus,
    task_id: &str,
    worktree_path: &Path,
    branch: &str,
    base_branch: &str,
    config: &AutomationConfig,
) -> Result<(), OrchestratorError> {
    let task = storage.get_task(task_id)?;
    let diff = diff_against_base(worktree_path, base_branch).await;
    let prompt_text = build_review_prompt(&task, &diff);

    let workspace_id = storage.active_workspace_for_task(task_id)?.map(|w| w.id).unwrap_or_default();
    let session = storage.create_session(&workspace_id, kagan_common::SessionType::Acp, None);
    let session_id = session.ok().map(|s| s.id).unwrap_or_else(kagan_common::new_id);

    let backend = resolve_backend(task.agent_backend.as_deref())?;
    let execution = storage.create_execution(&session_id, RunReason::Review, &json!({}))?;

    let (mut supervisor, mut perm_rx) =
        match AgentSupervisor::start(&backend.command, &backend.args, &worktree_path.to_path_buf(), true).await {
            Ok(pair) => pair,
            Err(_) => {
                return reject_and_retry(storage, registry, events, task_id, "review agent failed to start").await;
            }
        };
    registry.attach_review_agent(task_id, &backend.id);
    events.publish(DomainEvent::AutomationReviewAgentAttached {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task_id.to_string(),
        execution_id: execution.id.clone(),
        agent_identity: backend.id.clone(),
    });

    tokio::spawn(async move {
        while let Some(request) = perm_rx.recv().await {
            crate::acp::permission::auto_approve(request);
        }
    });

    let ready = supervisor
        .wait_ready(Duration::from_secs(config.agent_timeout_seconds))
        .await;
    if ready.is_err() {
        let _ = supervisor.stop().await;
        storage.finish_execution(&execution.id, kagan_common::ExecutionStatus::Failed, None, false)?;
        return reject_and_retry(storage, registry, events, task_id, "review agent failed to start").await;
    }

    let _ = supervisor.call("initialize", initialize_params(true)).await;
    // Review timeouts are treated as not-approved: a failed/timed-out call
    // still falls through to the reject path below via an empty output.
    let _ = supervisor.call("session/prompt", json!({"sessionId": session_id, "prompt": prompt_text})).await;
    let output = collect_turn_output(&supervisor.message_buffer_snapshot().await);
    storage.append_execution_log(&execution.id, &json!({"output": output}).to_string())?;
    let _ = supervisor.stop().await;
    storage.finish_execution(&execution.id, kagan_common::ExecutionStatus::Completed, None, false)?;

    match parse_review_signal(&output) {
        Some(ReviewSignal::Approve { summary, .. }) => {
            storage.append_scratch(task_id, &format!("## Review\nAPPROVED: {summary}"))?;
            match crate::merge::merge_into_target(&repo_root(worktree_path), branch, base_branch).await {
                Ok(outcome) => {
                    let (_, from) = storage.move_task(task_id, TaskStatus::Done, Some("review approved"))?;
                    events.publish(DomainEvent::TaskStatusChanged {
                        event_id: kagan_common::new_id(),
                        occurred_at: chrono::Utc::now(),
                        task_id: task_id.to_string(),
                        from: from.as_str().to_string(),
                        to: TaskStatus::Done.as_str().to_string(),
                        reason: "review approved".to_string(),
                    });
                    events.publish(DomainEvent::MergeCompleted {
                        event_id: kagan_common::new_id(),
                        occurred_at: chrono::Utc::now(),
                        workspace_id,
                        repo_id: String::new(),
                        target: base_branch.to_string(),
                        merge_commit: outcome.merge_commit,
                    });
                    registry.end(task_id);
                    Ok(())
                }
                Err(crate::merge::MergeError::Conflict { files }) => {
                    events.publish(DomainEvent::MergeFailed {
                        event_id: kagan_common::new_id(),
                        occurred_at: chrono::Utc::now(),
                        workspace_id,
                        repo_id: String::new(),
                        error: "merge conflict".to_string(),
                        conflict_files: files,
                    });
                    registry.mark_blocked(task_id, "merge conflict");
                    Ok(())
                }
                Err(other) => Err(OrchestratorError::Merge(other)),
            }
        }
        Some(ReviewSignal::Reject { reason }) => {
            reject_and_retry(storage, registry, events, task_id, &reason).await
        }
        None => reject_and_retry(storage, registry, events, task_id, "review timed out").await,
    }
}

fn repo_root(worktree_path: &Path) -> std::path::PathBuf {
    // `.kagan/worktrees/<task_id>` hangs off the repo root two levels up.
    worktree_path
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| worktree_path.to_path_buf())
}

async fn reject_and_retry(
    storage: &Storage,
    registry: &SharedRegistry,
    events: &EventBus,
    task_id: &str,
    reason: &str,
) -> Result<(), OrchestratorError> {
    storage.append_scratch(task_id, &format!("## Review\nREJECTED: {reason}"))?;
    let (_, from) = storage.move_task(task_id, TaskStatus::InProgress, Some(reason))?;
    events.publish(DomainEvent::TaskStatusChanged {
        event_id: kagan_common::new_id(),
        occurred_at: chrono::Utc::now(),
        task_id: task_id.to_string(),
        from: from.as_str().to_string(),
        to: TaskStatus::InProgress.as_str().to_string(),
        reason: reason.to_string(),
    });
    registry.end(task_id);
    Ok(())
}
