//! `create_pr_for_task` / `link_pr_to_task` / `reconcile_pr_status`: the PR
//! half of the GitHub plugin, grounded on the teacher's
//! `factory/pipeline.rs::create_pull_request` push-then-`gh pr create`
//! shape, generalized to record the result against a `Merge` row instead
//! of returning a bare URL.

use super::gh_cli::run_gh;
use crate::plugins::PluginError;
use crate::storage::Storage;
use kagan_common::{MergeType, PrStatus};
use kagan_wire::ErrorCode;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub async fn create_pr_for_task(
    storage: &Storage,
    workspace_id: &str,
    repo_id: &str,
    repo_path: &Path,
    branch: &str,
    target_branch: &str,
    title: &str,
    body: &str,
) -> Result<kagan_common::Merge, PluginError> {
    let push = Command::new("git")
        .args(["push", "-u", "origin", branch])
        .current_dir(repo_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|e| PluginError::new(ErrorCode::GhSyncFailed, e.to_string()))?;
    if !push.success() {
        return Err(PluginError::new(ErrorCode::GhSyncFailed, format!("failed to push branch {branch}")));
    }

    let pr_url = run_gh(
        repo_path,
        &["pr", "create", "--title", title, "--body", body, "--base", target_branch, "--head", branch],
    )
    .await?;

    let merge = storage
        .create_merge(workspace_id, repo_id, MergeType::Pr, target_branch)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    let pr_number = pr_url.rsplit('/').next().and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
    storage
        .record_pr(&merge.id, &pr_url, pr_number, PrStatus::Open)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    storage.get_merge(&merge.id).map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))
}

pub fn link_pr_to_task(storage: &Storage, merge_id: &str, pr_url: &str, pr_number: i64) -> Result<(), PluginError> {
    storage
        .record_pr(merge_id, pr_url, pr_number, PrStatus::Open)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct GhPrView {
    state: String,
    merge_commit: Option<GhCommit>,
}

#[derive(Debug, Deserialize)]
struct GhCommit {
    oid: String,
}

pub async fn reconcile_pr_status(storage: &Storage, merge_id: &str, repo_path: &Path, pr_number: i64) -> Result<PrStatus, PluginError> {
    let raw = run_gh(repo_path, &["pr", "view", &pr_number.to_string(), "--json", "state,mergeCommit"]).await?;
    let view: GhPrView = serde_json::from_str(&raw).map_err(|e| PluginError::new(ErrorCode::GhSyncFailed, e.to_string()))?;
    let status = match view.state.as_str() {
        "MERGED" => PrStatus::Merged,
        "CLOSED" => PrStatus::Closed,
        _ => PrStatus::Open,
    };
    let merge = storage.get_merge(merge_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    storage
        .record_pr(merge_id, merge.pr_url.as_deref().unwrap_or(""), pr_number, status)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    if let Some(commit) = view.merge_commit {
        storage
            .record_merge_commit(merge_id, &commit.oid)
            .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
    }
    Ok(status)
}
