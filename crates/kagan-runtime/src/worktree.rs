//! Worktree Manager (spec §4.10): per-task isolated git worktrees under
//! `<repo>/.kagan/worktrees/<task_id>`.
//!
//! Grounded on the teacher's `factory/pipeline.rs` CLI-shelling idiom
//! (`tokio::process::Command` + `.output()`, stderr captured into the error
//! path) rather than `tracker/git.rs`'s `git2` reads, since every operation
//! here mutates the repository (branch creation, worktree add/remove,
//! fetch, merge) the way the teacher's `create_git_branch`/
//! `create_pull_request` do.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("worktree path already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },

    #[error("merge conflict in files: {files:?}")]
    Conflict { files: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseRefStrategy {
    Remote,
    Local,
    LocalIfAhead,
}

impl BaseRefStrategy {
    pub fn from_str(s: &str) -> Self {
        match s {
            "local" => Self::Local,
            "local_if_ahead" => Self::LocalIfAhead,
            _ => Self::Remote,
        }
    }
}

const BRANCH_PREFIX: &str = "kagan/";
const MAX_SLUG_LEN: usize = 30;

/// Lowercase ASCII-alphanumeric with dashes, max `MAX_SLUG_LEN` chars,
/// never empty (spec §4.10). Grounded on the teacher's `slugify` in
/// `factory/pipeline.rs`, generalized to guarantee non-emptiness.
pub fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let trimmed = if slug.len() > MAX_SLUG_LEN {
        slug[..MAX_SLUG_LEN].trim_end_matches('-').to_string()
    } else {
        slug
    };
    if trimmed.is_empty() { "task".to_string() } else { trimmed }
}

pub fn branch_name(task_id: &str, title: &str) -> String {
    format!("{BRANCH_PREFIX}{task_id}-{}", slugify(title))
}

async fn run_git(repo_path: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        return Err(WorktreeError::GitFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct WorktreeManager {
    strategy: BaseRefStrategy,
}

impl WorktreeManager {
    pub fn new(strategy: BaseRefStrategy) -> Self {
        Self { strategy }
    }

    fn worktrees_root(repo_path: &Path) -> PathBuf {
        repo_path.join(".kagan").join("worktrees")
    }

    async fn resolve_base_ref(&self, repo_path: &Path, base_branch: &str) -> Result<String, WorktreeError> {
        match self.strategy {
            BaseRefStrategy::Remote => {
                run_git(repo_path, &["fetch", "origin", base_branch]).await?;
                Ok(format!("origin/{base_branch}"))
            }
            BaseRefStrategy::Local => Ok(format!("refs/heads/{base_branch}")),
            BaseRefStrategy::LocalIfAhead => {
                run_git(repo_path, &["fetch", "origin", base_branch]).await?;
                let range = format!("origin/{base_branch}..{base_branch}");
                let count = run_git(repo_path, &["rev-list", "--count", &range]).await?;
                if count.trim().parse::<u64>().unwrap_or(0) > 0 {
                    Ok(format!("refs/heads/{base_branch}"))
                } else {
                    Ok(format!("origin/{base_branch}"))
                }
            }
        }
    }

    pub async fn create(
        &self,
        repo_path: &Path,
        task_id: &str,
        title: &str,
        base_branch: &str,
    ) -> Result<(PathBuf, String), WorktreeError> {
        let root = Self::worktrees_root(repo_path);
        tokio::fs::create_dir_all(&root).await?;
        let path = root.join(task_id);
        if path.exists() {
            return Err(WorktreeError::AlreadyExists(path));
        }
        let base_ref = self.resolve_base_ref(repo_path, base_branch).await?;
        let branch = branch_name(task_id, title);
        run_git(
            repo_path,
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                path.to_str().unwrap_or_default(),
                &base_ref,
            ],
        )
        .await?;
        Ok((path, branch))
    }

    pub async fn delete(
        &self,
        repo_path: &Path,
        task_id: &str,
        branch: Option<&str>,
        delete_branch: bool,
    ) -> Result<(), WorktreeError> {
        let path = Self::worktrees_root(repo_path).join(task_id);
        let removed = run_git(
            repo_path,
            &["worktree", "remove", "--force", path.to_str().unwrap_or_default()],
        )
        .await;
        if removed.is_err() {
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
            let _ = run_git(repo_path, &["worktree", "prune"]).await;
        }
        if delete_branch {
            if let Some(branch) = branch {
                if branch.starts_with(BRANCH_PREFIX) {
                    let _ = run_git(repo_path, &["branch", "-D", branch]).await;
                }
            }
        }
        Ok(())
    }

    /// Parses `git worktree list --porcelain` and intersects with the
    /// on-disk `.kagan/worktrees/` directory to return live task ids.
    pub async fn list_all(&self, repo_path: &Path) -> Result<Vec<String>, WorktreeError> {
        let output = run_git(repo_path, &["worktree", "list", "--porcelain"]).await?;
        let root = Self::worktrees_root(repo_path);
        let mut task_ids = Vec::new();
        for line in output.lines() {
            if let Some(path_str) = line.strip_prefix("worktree ") {
                let path = PathBuf::from(path_str);
                if let Ok(relative) = path.strip_prefix(&root) {
                    if let Some(task_id) = relative.file_name().and_then(|n| n.to_str()) {
                        task_ids.push(task_id.to_string());
                    }
                }
            }
        }
        Ok(task_ids)
    }
}

/// Runs `git merge --no-ff <source> -m "..."` (or rebase) in `repo_path`
/// (already checked out to the target branch), aborting and reporting
/// conflict files on `CONFLICT` in the output (spec §4.10/§4.11).
pub async fn merge_or_rebase(
    repo_path: &Path,
    source: &str,
    message: &str,
    rebase: bool,
) -> Result<String, WorktreeError> {
    let result = if rebase {
        run_git(repo_path, &["rebase", source]).await
    } else {
        run_git(repo_path, &["merge", "--no-ff", source, "-m", message]).await
    };

    match result {
        Ok(out) => Ok(out),
        Err(WorktreeError::GitFailed { stderr, .. }) if stderr.contains("CONFLICT") => {
            let abort_args: &[&str] = if rebase { &["rebase", "--abort"] } else { &["merge", "--abort"] };
            let _ = run_git(repo_path, abort_args).await;
            let status = run_git(repo_path, &["diff", "--name-only", "--diff-filter=U"])
                .await
                .unwrap_or_default();
            let files = status.lines().map(|s| s.to_string()).collect();
            Err(WorktreeError::Conflict { files })
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercase_dashed_and_bounded() {
        let slug = slugify("Rename Foo To Bar, Please! (urgently)");
        assert_eq!(slug, slug.to_lowercase());
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn slug_of_empty_title_is_never_empty() {
        assert_eq!(slugify("!!!"), "task");
    }

    #[test]
    fn branch_name_uses_kagan_prefix() {
        let name = branch_name("task-1", "Rename foo to bar");
        assert!(name.starts_with("kagan/task-1-"));
    }

    #[test]
    fn base_ref_strategy_parses_known_values() {
        assert_eq!(BaseRefStrategy::from_str("local"), BaseRefStrategy::Local);
        assert_eq!(BaseRefStrategy::from_str("local_if_ahead"), BaseRefStrategy::LocalIfAhead);
        assert_eq!(BaseRefStrategy::from_str("anything-else"), BaseRefStrategy::Remote);
    }
}
