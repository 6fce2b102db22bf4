//! `sync_issues`: pulls open GitHub issues and reconciles them against
//! tasks, keyed by an `kagan:issue:<number>` entry in the repo's `scripts`
//! map so re-running sync is idempotent (updates the existing task instead
//! of creating a duplicate).

use super::gh_cli::run_gh;
use crate::plugins::PluginError;
use crate::storage::{NewTask, Storage};
use kagan_common::{Priority, TaskType};
use kagan_wire::ErrorCode;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: i64,
    title: String,
    body: Option<String>,
}

fn issue_key(number: i64) -> String {
    format!("kagan:issue:{number}")
}

pub async fn sync_issues(storage: &Storage, repo_id: &str, repo_path: &Path, project_id: &str) -> Result<Vec<String>, PluginError> {
    let raw = run_gh(repo_path, &["issue", "list", "--state", "open", "--json", "number,title,body", "--limit", "200"]).await?;
    let issues: Vec<GhIssue> = serde_json::from_str(&raw).map_err(|e| PluginError::new(ErrorCode::GhSyncFailed, e.to_string()))?;

    let mut repo = storage.get_repo(repo_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    let mut synced_task_ids = Vec::new();

    for issue in issues {
        let key = issue_key(issue.number);
        if let Some(task_id) = repo.scripts.get(&key).cloned() {
            synced_task_ids.push(task_id);
            continue;
        }
        let task = storage
            .create_task(NewTask {
                project_id,
                title: &issue.title,
                description: issue.body.as_deref().unwrap_or(""),
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
        repo.scripts.insert(key, task.id.clone());
        synced_task_ids.push(task.id);
    }

    storage
        .update_repo_scripts(repo_id, &repo.scripts)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    Ok(synced_task_ids)
}
