//! GitHub Plugin (spec §4.17): bundled first-party example registering the
//! `kagan_github` capability. All network-touching work shells out to the
//! `gh` CLI (see [`gh_cli`]); nothing here talks to GitHub's REST API
//! directly.

pub mod gh_cli;
pub mod lease;
pub mod pr;
pub mod sync;

use crate::plugins::{PluginError, PluginFuture, PluginHandler, PluginRegistrationError, PluginRegistry};
use crate::storage::Storage;
use kagan_wire::ErrorCode;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CAPABILITY: &str = "kagan_github";

fn string_param(params: &Map<String, Value>, key: &str) -> Result<String, PluginError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| PluginError::new(ErrorCode::ValidationError, format!("missing required param `{key}`")))
}

fn int_param(params: &Map<String, Value>, key: &str) -> Result<i64, PluginError> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| PluginError::new(ErrorCode::ValidationError, format!("missing required param `{key}`")))
}

async fn repo_path_for(storage: &Storage, repo_id: &str) -> Result<PathBuf, PluginError> {
    let repo = storage.get_repo(repo_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    Ok(PathBuf::from(repo.path))
}

fn contract_probe_result() -> Value {
    serde_json::json!({
        "methods": [
            "contract_probe", "connect_repo", "sync_issues", "acquire_lease",
            "release_lease", "get_lease_state", "create_pr_for_task",
            "link_pr_to_task", "reconcile_pr_status",
        ],
    })
}

async fn connect_repo_impl(storage: &Storage, repo_id: &str, repo_path: &Path) -> Result<Value, PluginError> {
    gh_cli::preflight(repo_path).await?;
    let remote = gh_cli::run_gh(repo_path, &["repo", "view", "--json", "nameWithOwner"]).await?;
    let mut repo = storage.get_repo(repo_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    repo.scripts.insert("kagan:github:connection".to_string(), remote.clone());
    storage
        .update_repo_scripts(repo_id, &repo.scripts)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    Ok(serde_json::json!({"connected": true, "remote": remote}))
}

async fn connect_repo(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let repo_id = string_param(&params, "repo_id")?;
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    connect_repo_impl(&storage, &repo_id, &repo_path).await
}

async fn sync_issues(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let repo_id = string_param(&params, "repo_id")?;
    let project_id = string_param(&params, "project_id")?;
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    gh_cli::preflight(&repo_path).await?;
    let task_ids = sync::sync_issues(&storage, &repo_id, &repo_path, &project_id).await?;
    Ok(serde_json::json!({"synced_task_ids": task_ids}))
}

async fn acquire_lease(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let repo_id = string_param(&params, "repo_id")?;
    let issue_number = int_param(&params, "issue_number")?;
    let task_id = string_param(&params, "task_id")?;
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    let lease = lease::acquire_lease(&storage, &repo_id, &repo_path, issue_number, &task_id).await?;
    Ok(serde_json::to_value(lease).unwrap_or_default())
}

async fn release_lease(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let repo_id = string_param(&params, "repo_id")?;
    let issue_number = int_param(&params, "issue_number")?;
    let task_id = string_param(&params, "task_id")?;
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    lease::release_lease(&storage, &repo_id, &repo_path, issue_number, &task_id).await?;
    Ok(serde_json::json!({"released": true}))
}

async fn get_lease_state(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let repo_id = string_param(&params, "repo_id")?;
    let issue_number = int_param(&params, "issue_number")?;
    let state = lease::get_lease_state(&storage, &repo_id, issue_number)?;
    Ok(serde_json::to_value(state).unwrap_or(Value::Null))
}

async fn create_pr_for_task(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let workspace_id = string_param(&params, "workspace_id")?;
    let repo_id = string_param(&params, "repo_id")?;
    let branch = string_param(&params, "branch")?;
    let target_branch = string_param(&params, "target_branch")?;
    let title = string_param(&params, "title")?;
    let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    let merge = pr::create_pr_for_task(&storage, &workspace_id, &repo_id, &repo_path, &branch, &target_branch, &title, &body).await?;
    Ok(serde_json::to_value(merge).unwrap_or_default())
}

async fn link_pr_to_task(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let merge_id = string_param(&params, "merge_id")?;
    let pr_url = string_param(&params, "pr_url")?;
    let pr_number = int_param(&params, "pr_number")?;
    pr::link_pr_to_task(&storage, &merge_id, &pr_url, pr_number)?;
    Ok(serde_json::json!({"linked": true}))
}

async fn reconcile_pr_status(storage: Arc<Storage>, params: Map<String, Value>) -> Result<Value, PluginError> {
    let merge_id = string_param(&params, "merge_id")?;
    let repo_id = string_param(&params, "repo_id")?;
    let pr_number = int_param(&params, "pr_number")?;
    let repo_path = repo_path_for(&storage, &repo_id).await?;
    let status = pr::reconcile_pr_status(&storage, &merge_id, &repo_path, pr_number).await?;
    Ok(serde_json::json!({"pr_status": status.as_str()}))
}

/// Wraps an `async fn(Arc<Storage>, Map<String, Value>) -> Result<Value,
/// PluginError>` as a [`PluginHandler`] closing over `storage`.
fn wrap<F, Fut>(storage: &Arc<Storage>, f: F) -> PluginHandler
where
    F: Fn(Arc<Storage>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, PluginError>> + Send + 'static,
{
    let storage = storage.clone();
    Arc::new(move |params: Map<String, Value>| -> PluginFuture {
        let storage = storage.clone();
        Box::pin(f(storage, params))
    })
}

/// Registers every `kagan_github` method against `registry`, closing over
/// `storage` so handlers need no further context than their raw params.
pub fn register(registry: &mut PluginRegistry, storage: Arc<Storage>) -> Result<(), PluginRegistrationError> {
    registry.register(
        CAPABILITY,
        "contract_probe",
        wrap(&storage, |_storage, _params| async move { Ok(contract_probe_result()) }),
    )?;
    registry.register(CAPABILITY, "connect_repo", wrap(&storage, connect_repo))?;
    registry.register(CAPABILITY, "sync_issues", wrap(&storage, sync_issues))?;
    registry.register(CAPABILITY, "acquire_lease", wrap(&storage, acquire_lease))?;
    registry.register(CAPABILITY, "release_lease", wrap(&storage, release_lease))?;
    registry.register(CAPABILITY, "get_lease_state", wrap(&storage, get_lease_state))?;
    registry.register(CAPABILITY, "create_pr_for_task", wrap(&storage, create_pr_for_task))?;
    registry.register(CAPABILITY, "link_pr_to_task", wrap(&storage, link_pr_to_task))?;
    registry.register(CAPABILITY, "reconcile_pr_status", wrap(&storage, reconcile_pr_status))?;
    Ok(())
}
