//! Shells out to an authenticated `gh` CLI. Grounded on the teacher's
//! `factory/pipeline.rs::create_pull_request`, which already runs `gh pr
//! create` via `tokio::process::Command` rather than hitting GitHub's REST
//! API directly; every GitHub plugin method follows the same shape.

use crate::plugins::PluginError;
use kagan_wire::ErrorCode;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub async fn run_gh(repo_path: &Path, args: &[&str]) -> Result<String, PluginError> {
    let output = Command::new("gh")
        .args(args)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PluginError::new(ErrorCode::GhCliNotAvailable, e.to_string()))?;
    if !output.status.success() {
        return Err(PluginError::new(
            ErrorCode::GhSyncFailed,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Preflight checks run before any `kagan_github` method touches the
/// network: binary present, authenticated, repo has a remote.
pub async fn preflight(repo_path: &Path) -> Result<(), PluginError> {
    let which = Command::new("gh").arg("--version").output().await;
    if which.is_err() || !which.unwrap().status.success() {
        return Err(PluginError::new(ErrorCode::GhCliNotAvailable, "gh CLI is not installed or not on PATH"));
    }

    let auth = Command::new("gh").args(["auth", "status"]).current_dir(repo_path).output().await;
    match auth {
        Ok(out) if out.status.success() => {}
        _ => return Err(PluginError::new(ErrorCode::GhNotAuthenticated, "gh is not authenticated; run `gh auth login`")),
    }

    let remote = Command::new("git").args(["remote", "get-url", "origin"]).current_dir(repo_path).output().await;
    match remote {
        Ok(out) if out.status.success() => Ok(()),
        _ => Err(PluginError::new(ErrorCode::GhNoRemote, "repo has no `origin` remote")),
    }
}
