//! Issue lease protocol (spec §4.17): a simple ownership claim over a
//! GitHub issue, recorded as an `kagan:lease` JSON blob in the repo's
//! `scripts` map and mirrored to the issue as a comment so a human watching
//! the issue sees who holds it.

use crate::plugins::PluginError;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use kagan_wire::ErrorCode;
use serde::{Deserialize, Serialize};
use std::path::Path;

const LEASE_KEY_PREFIX: &str = "kagan:lease:issue:";
const DEFAULT_LEASE_TIMEOUT_SECONDS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLease {
    pub owner_task_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssueLease {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

fn lease_key(issue_number: i64) -> String {
    format!("{LEASE_KEY_PREFIX}{issue_number}")
}

pub fn get_lease_state(storage: &Storage, repo_id: &str, issue_number: i64) -> Result<Option<IssueLease>, PluginError> {
    let repo = storage
        .get_repo(repo_id)
        .map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    let key = lease_key(issue_number);
    match repo.scripts.get(&key) {
        Some(raw) => {
            let lease: IssueLease = serde_json::from_str(raw).map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;
            if lease.is_expired() {
                Ok(None)
            } else {
                Ok(Some(lease))
            }
        }
        None => Ok(None),
    }
}

pub async fn acquire_lease(
    storage: &Storage,
    repo_id: &str,
    repo_path: &Path,
    issue_number: i64,
    task_id: &str,
) -> Result<IssueLease, PluginError> {
    if let Some(existing) = get_lease_state(storage, repo_id, issue_number)? {
        if existing.owner_task_id != task_id {
            return Err(PluginError::new(
                ErrorCode::GhSyncFailed,
                format!("issue #{issue_number} is already leased by task {}", existing.owner_task_id),
            ));
        }
    }

    let now = Utc::now();
    let lease = IssueLease {
        owner_task_id: task_id.to_string(),
        acquired_at: now,
        expires_at: now + chrono::Duration::seconds(DEFAULT_LEASE_TIMEOUT_SECONDS),
    };

    let mut repo = storage.get_repo(repo_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    repo.scripts.insert(lease_key(issue_number), serde_json::to_string(&lease).unwrap());
    storage
        .update_repo_scripts(repo_id, &repo.scripts)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;

    let comment = format!("Leased by kagan task `{task_id}` until {}.", lease.expires_at.to_rfc3339());
    let _ = super::gh_cli::run_gh(repo_path, &["issue", "comment", &issue_number.to_string(), "--body", &comment]).await;
    Ok(lease)
}

pub async fn release_lease(
    storage: &Storage,
    repo_id: &str,
    repo_path: &Path,
    issue_number: i64,
    task_id: &str,
) -> Result<(), PluginError> {
    if let Some(existing) = get_lease_state(storage, repo_id, issue_number)? {
        if existing.owner_task_id != task_id {
            return Err(PluginError::new(
                ErrorCode::GhSyncFailed,
                format!("task {task_id} does not hold the lease on issue #{issue_number}"),
            ));
        }
    }
    let mut repo = storage.get_repo(repo_id).map_err(|e| PluginError::new(ErrorCode::NotFound, e.to_string()))?;
    repo.scripts.remove(&lease_key(issue_number));
    storage
        .update_repo_scripts(repo_id, &repo.scripts)
        .map_err(|e| PluginError::new(ErrorCode::InternalError, e.to_string()))?;

    let comment = format!("Lease released by kagan task `{task_id}`.");
    let _ = super::gh_cli::run_gh(repo_path, &["issue", "comment", &issue_number.to_string(), "--body", &comment]).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lease_reports_no_state() {
        let storage = Storage::open_in_memory().unwrap();
        let repo = storage.create_repo("r", "/tmp/r", "main", None, None).unwrap();
        let state = get_lease_state(&storage, &repo.id, 42).unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn expired_lease_reports_as_absent() {
        let storage = Storage::open_in_memory().unwrap();
        let mut repo = storage.create_repo("r", "/tmp/r", "main", None, None).unwrap();
        let stale = IssueLease {
            owner_task_id: "t1".into(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            expires_at: Utc::now() - chrono::Duration::hours(1),
        };
        repo.scripts.insert(lease_key(1), serde_json::to_string(&stale).unwrap());
        storage.update_repo_scripts(&repo.id, &repo.scripts).unwrap();
        assert!(get_lease_state(&storage, &repo.id, 1).unwrap().is_none());
    }
}
