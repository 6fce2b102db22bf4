//! Per-task iteration loop (`run_task_loop`, spec §4.11), the sole writer
//! of a task's runtime view. Grounded on the teacher's
//! `orchestrator/runner.rs` drive-until-terminal-signal shape, generalized
//! from Claude stream-json parsing to ACP JSON-RPC plus the closed signal
//! set in [`super::signals`].

use crate::acp::negotiation::initialize_params;
use crate::acp::registry::resolve_backend;
use crate::acp::supervisor::AgentSupervisor;
use crate::events::EventBus;
use crate::orchestrator::prompt::{Hat, build_prompt};
use crate::orchestrator::signals::{WorkerSignal, parse_worker_signal};
use crate::orchestrator::{AutomationConfig, OrchestratorError};
use crate::registry::SharedRegistry;
use crate::storage::Storage;
use crate::worktree::WorktreeManager;
use kagan_common::{DomainEvent, RunReason, TaskStatus};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio::time::Duration;

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Concatenates every `session/update` notification's `AgentUpdate` text
/// observed in the supervisor's message buffer since the turn began.
pub(crate) fn collect_turn_output(buffer: &[Value]) -> String {
    let mut out = String::new();
    for entry in buffer {
        if entry.get("method").and_then(|m| m.as_str()) != Some("session/update") {
            continue;
        }
        let params = entry.get("params").cloned().unwrap_or(Value::Null);
        if let Some(text) = params.get("text").and_then(|v| v.as_str()) {
            out.push_str(text);
        }
    }
    out
}

pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(text.chars().count() - max_chars).collect()
    }
}

/// Runs one AUTO task to a terminal outcome: BLOCKED/BACKLOG on failure,
/// REVIEW (or DONE, when review is skipped) on a COMPLETE signal.
pub async fn run_task_loop(
    storage: Arc<Storage>,
    registry: SharedRegistry,
    events: Arc<EventBus>,
    repo_path: &Path,
    task_id: String,
    config: AutomationConfig,
) -> Result<(), OrchestratorError> {
    let task = storage.get_task(&task_id)?;
    let base_branch = task.base_branch.clone().unwrap_or_else(|| "main".to_string());

    let worktrees = WorktreeManager::new(config.worktree_base_strategy);
    let existing = worktrees.list_all(repo_path).await?.contains(&task_id);
    let (worktree_path, branch) = if existing {
        let path = repo_path.join(".kagan").join("worktrees").join(&task_id);
        (path, crate::worktree::branch_name(&task_id, &task.title))
    } else {
        worktrees.create(repo_path, &task_id, &task.title, &base_branch).await?
    };

    let session = storage.create_session(
        &storage.active_workspace_for_task(&task_id)?.map(|w| w.id).unwrap_or_default(),
        kagan_common::SessionType::Acp,
        None,
    );
    let session_id = session.ok().map(|s| s.id).unwrap_or_else(kagan_common::new_id);

    let backend = resolve_backend(task.agent_backend.as_deref())?;

    for iteration in 1..=config.max_iterations {
        let scratchpad = storage.get_scratch(&task_id)?;
        let hat: Option<Hat> = None;
        let prompt_text = build_prompt(&task, iteration, config.max_iterations, &scratchpad, hat.as_ref());

        let execution = storage.create_execution(&session_id, RunReason::CodingAgent, &json!({"iteration": iteration}))?;
        registry.start(&task_id, &execution.id);
        events.publish(DomainEvent::AutomationTaskStarted {
            event_id: kagan_common::new_id(),
            occurred_at: now(),
            task_id: task_id.clone(),
            execution_id: execution.id.clone(),
        });

        let (mut supervisor, mut perm_rx) =
            match AgentSupervisor::start(&backend.command, &backend.args, &worktree_path, false).await {
                Ok(pair) => pair,
                Err(_) => {
                    registry.mark_blocked(&task_id, "failed to start");
                    let (_, from) = storage.move_task(&task_id, TaskStatus::Backlog, Some("failed to start"))?;
                    events.publish(DomainEvent::TaskStatusChanged {
                        event_id: kagan_common::new_id(),
                        occurred_at: now(),
                        task_id: task_id.clone(),
                        from: from.as_str().to_string(),
                        to: TaskStatus::Backlog.as_str().to_string(),
                        reason: "agent failed to start".to_string(),
                    });
                    registry.end(&task_id);
                    return Ok(());
                }
            };

        registry.attach_running_agent(&task_id, &backend.id);
        events.publish(DomainEvent::AutomationAgentAttached {
            event_id: kagan_common::new_id(),
            occurred_at: now(),
            task_id: task_id.clone(),
            execution_id: execution.id.clone(),
            agent_identity: backend.id.clone(),
        });

        let auto_approve = config.auto_approve;
        tokio::spawn(async move {
            while let Some(request) = perm_rx.recv().await {
                if auto_approve {
                    crate::acp::permission::auto_approve(request);
                } else {
                    crate::acp::permission::resolve_with_timeout(request, std::future::pending()).await;
                }
            }
        });

        let ready = supervisor.wait_ready(Duration::from_secs(config.agent_timeout_seconds)).await;
        if ready.is_err() {
            let _ = supervisor.stop().await;
            registry.mark_blocked(&task_id, "agent failed to start");
            let (_, from) = storage.move_task(&task_id, TaskStatus::Backlog, Some("agent failed to start"))?;
            events.publish(DomainEvent::TaskStatusChanged {
                event_id: kagan_common::new_id(),
                occurred_at: now(),
                task_id: task_id.clone(),
                from: from.as_str().to_string(),
                to: TaskStatus::Backlog.as_str().to_string(),
                reason: "agent failed to start".to_string(),
            });
            registry.end(&task_id);
            storage.finish_execution(&execution.id, kagan_common::ExecutionStatus::Failed, None, false)?;
            return Ok(());
        }

        let _ = supervisor.call("initialize", initialize_params(false)).await;
        let prompt_result = supervisor
            .call("session/prompt", json!({"sessionId": session_id, "prompt": prompt_text}))
            .await;

        let output = collect_turn_output(&supervisor.message_buffer_snapshot().await);
        storage.append_execution_log(&execution.id, &json!({"iteration": iteration, "output": output}).to_string())?;
        storage.persist_turn(&execution.id, &prompt_text, &tail(&output, 2000), None)?;
        storage.append_scratch(&task_id, &format!("## Iteration {iteration}\n{}", tail(&output, 2000)))?;

        let _ = supervisor.stop().await;
        storage.finish_execution(
            &execution.id,
            if prompt_result.is_ok() { kagan_common::ExecutionStatus::Completed } else { kagan_common::ExecutionStatus::Failed },
            None,
            false,
        )?;

        let signal = parse_worker_signal(&output);
        match signal {
            Some(WorkerSignal::Complete) => {
                handle_complete(&storage, &registry, &events, &task_id, &worktree_path, &branch, &base_branch, &config).await?;
                return Ok(());
            }
            Some(WorkerSignal::Blocked { reason }) => {
                registry.mark_blocked(&task_id, &reason);
                let (_, from) = storage.move_task(&task_id, TaskStatus::Backlog, Some(&reason))?;
                events.publish(DomainEvent::TaskStatusChanged {
                    event_id: kagan_common::new_id(),
                    occurred_at: now(),
                    task_id: task_id.clone(),
                    from: from.as_str().to_string(),
                    to: TaskStatus::Backlog.as_str().to_string(),
                    reason,
                });
                registry.end(&task_id);
                return Ok(());
            }
            Some(WorkerSignal::Continue) | None => {
                tokio::time::sleep(Duration::from_secs(config.iteration_delay_seconds)).await;
                continue;
            }
        }
    }

    handle_max_iterations(&storage, &registry, &events, &task_id).await?;
    Ok(())
}

async fn handle_complete(
    storage: &Storage,
    registry: &SharedRegistry,
    events: &EventBus,
    task_id: &str,
    worktree_path: &Path,
    branch: &str,
    base_branch: &str,
    config: &AutomationConfig,
) -> Result<(), OrchestratorError> {
    if config.auto_review {
        registry.request_review(task_id);
        let (_, from) = storage.move_task(task_id, TaskStatus::Review, None)?;
        events.publish(DomainEvent::TaskStatusChanged {
            event_id: kagan_common::new_id(),
            occurred_at: now(),
            task_id: task_id.to_string(),
            from: from.as_str().to_string(),
            to: TaskStatus::Review.as_str().to_string(),
            reason: "worker completed".to_string(),
        });
        crate::orchestrator::review::run_review_loop(
            storage,
            registry,
            events,
            task_id,
            worktree_path,
            branch,
            base_branch,
            config,
        )
        .await
    } else {
        let (_, from) = storage.move_task(task_id, TaskStatus::Review, None)?;
        events.publish(DomainEvent::TaskStatusChanged {
            event_id: kagan_common::new_id(),
            occurred_at: now(),
            task_id: task_id.to_string(),
            from: from.as_str().to_string(),
            to: TaskStatus::Review.as_str().to_string(),
            reason: "worker completed, auto_review disabled".to_string(),
        });
        registry.end(task_id);
        Ok(())
    }
}

async fn handle_max_iterations(
    storage: &Storage,
    registry: &SharedRegistry,
    events: &EventBus,
    task_id: &str,
) -> Result<(), OrchestratorError> {
    let (_, from) = storage.move_task(task_id, TaskStatus::Backlog, Some("max iterations reached"))?;
    events.publish(DomainEvent::TaskStatusChanged {
        event_id: kagan_common::new_id(),
        occurred_at: now(),
        task_id: task_id.to_string(),
        from: from.as_str().to_string(),
        to: TaskStatus::Backlog.as_str().to_string(),
        reason: "max iterations reached".to_string(),
    });
    registry.end(task_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_turn_output_concatenates_update_text() {
        let buffer = vec![
            json!({"method": "session/update", "params": {"text": "hello "}}),
            json!({"method": "session/update", "params": {"text": "world"}}),
            json!({"method": "other", "params": {}}),
        ];
        assert_eq!(collect_turn_output(&buffer), "hello world");
    }

    #[test]
    fn tail_truncates_to_last_n_chars() {
        let text = "0123456789";
        assert_eq!(tail(text, 4), "6789");
        assert_eq!(tail(text, 100), text);
    }
}
