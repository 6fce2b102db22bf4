//! Scheduler tick (spec §4.11 "Tick"): fetches tasks, reconciles
//! terminal-state agents, and spawns eligible AUTO candidates up to
//! `max_concurrent_agents`. One tick runs on a fixed interval; task
//! mutation events (§4.11 "every ~N ms or on task-mutation events") can
//! also trigger an out-of-band tick via the same entry point.

use crate::events::EventBus;
use crate::orchestrator::AutomationConfig;
use crate::orchestrator::runner::run_task_loop;
use crate::registry::SharedRegistry;
use crate::storage::Storage;
use kagan_common::TaskType;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_TICK_INTERVAL: tokio::time::Duration = tokio::time::Duration::from_millis(2000);

/// Resolves the filesystem path of the repo backing a task's project. A
/// project with no repo cannot run automation; such tasks are skipped
/// with a warning rather than failing the whole tick.
fn repo_path_for_project(storage: &Storage, project_id: &str) -> Option<PathBuf> {
    storage
        .repos_for_project(project_id)
        .ok()
        .and_then(|repos| repos.into_iter().next())
        .map(|repo| PathBuf::from(repo.path))
}

/// Runs one scheduler tick. Returns the set of task ids newly spawned.
pub async fn tick(
    storage: Arc<Storage>,
    registry: SharedRegistry,
    events: Arc<EventBus>,
) -> Result<Vec<String>, crate::storage::StorageError> {
    let config = AutomationConfig::load(&storage)?;

    let tasks = storage.list_tasks(None)?;
    let mut spawned = Vec::new();

    if !config.auto_start {
        return Ok(spawned);
    }

    let mut repo_cache: HashMap<String, Option<PathBuf>> = HashMap::new();

    for task in &tasks {
        if task.task_type != TaskType::Auto || task.status != kagan_common::TaskStatus::InProgress {
            continue;
        }
        if registry.has_view(&task.id) {
            continue;
        }
        if registry.running_count() >= config.max_concurrent_agents as usize {
            registry.mark_pending(&task.id, "max_concurrent_agents reached");
            continue;
        }

        let repo_path = repo_cache
            .entry(task.project_id.clone())
            .or_insert_with(|| repo_path_for_project(&storage, &task.project_id))
            .clone();
        let Some(repo_path) = repo_path else {
            tracing::warn!(task_id = %task.id, "no repo for project, skipping automation");
            continue;
        };

        let storage = storage.clone();
        let registry = registry.clone();
        let events = events.clone();
        let config = config.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            if let Err(err) = run_task_loop(storage, registry.clone(), events, &repo_path, task_id.clone(), config).await {
                tracing::warn!(task_id = %task_id, error = %err, "run_task_loop failed");
                registry.end(&task_id);
            }
        });
        spawned.push(task.id.clone());
    }

    Ok(spawned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuntimeRegistry;

    #[tokio::test]
    async fn tick_does_nothing_when_auto_start_disabled() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let registry = Arc::new(RuntimeRegistry::new());
        let events = Arc::new(EventBus::new());
        let spawned = tick(storage, registry, events).await.unwrap();
        assert!(spawned.is_empty());
    }

    #[tokio::test]
    async fn tick_skips_tasks_with_no_project_repo() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage.update_setting("auto_start", &serde_json::Value::Bool(true)).unwrap();
        let project = storage.create_project("P", None).unwrap();
        storage
            .create_task(crate::storage::NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: kagan_common::Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        let registry = Arc::new(RuntimeRegistry::new());
        let events = Arc::new(EventBus::new());
        let spawned = tick(storage, registry, events).await.unwrap();
        assert!(spawned.is_empty());
    }
}
