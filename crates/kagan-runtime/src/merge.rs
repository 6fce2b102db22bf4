//! Merge Service (spec §4.11 "Merge"/"Rebase", component table #17):
//! fetch-checkout-merge against the target branch, conflict abort with
//! file list, push on success. Grounded on the teacher's
//! `AgentExecutor::merge_branch` in `factory/agent_executor.rs`: record the
//! starting branch, checkout target, `git merge --no-ff`, abort and restore
//! on failure.

use crate::worktree::{WorktreeError, merge_or_rebase};
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },

    #[error("merge conflict")]
    Conflict { files: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WorktreeError> for MergeError {
    fn from(err: WorktreeError) -> Self {
        match err {
            WorktreeError::Conflict { files } => Self::Conflict { files },
            WorktreeError::GitFailed { command, stderr } => Self::GitFailed { command, stderr },
            WorktreeError::Io(e) => Self::Io(e),
            other => Self::GitFailed { command: "git".to_string(), stderr: other.to_string() },
        }
    }
}

async fn run_git(repo_path: &Path, args: &[&str]) -> Result<String, MergeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        return Err(MergeError::GitFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct MergeOutcome {
    pub merge_commit: String,
}

/// `git fetch origin <target>`; `git checkout <target>`; `git merge --no-ff
/// <source>`. On success, `git push origin <target>`. On conflict, abort
/// and return `MergeError::Conflict` with the file list (spec §4.11).
pub async fn merge_into_target(repo_path: &Path, source: &str, target: &str) -> Result<MergeOutcome, MergeError> {
    run_git(repo_path, &["fetch", "origin", target]).await?;
    run_git(repo_path, &["checkout", target]).await?;

    let message = format!("Merge {source}");
    merge_or_rebase(repo_path, source, &message, false).await?;

    run_git(repo_path, &["push", "origin", target]).await?;
    let merge_commit = run_git(repo_path, &["rev-parse", "HEAD"]).await?;
    Ok(MergeOutcome { merge_commit })
}

/// `git rebase <target>`; never `--skip` on conflict, only abort and
/// report.
pub async fn rebase_onto_target(repo_path: &Path, target: &str) -> Result<(), MergeError> {
    merge_or_rebase(repo_path, target, "", true).await?;
    Ok(())
}

/// Process-wide serialization when `serialize_merges=true` (spec §4.11
/// "Gating"): a single `tokio::sync::Mutex` held for the duration of one
/// merge.
#[derive(Default)]
pub struct MergeLock(tokio::sync::Mutex<()>);

impl MergeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merge_lock_serializes_access() {
        let lock = MergeLock::new();
        let _guard = lock.acquire().await;
        drop(_guard);
        let _guard2 = lock.acquire().await;
    }
}
