//! Automation Orchestrator (spec §4.11): the scheduler tick, the per-task
//! iteration loop, and the review flow.

pub mod prompt;
pub mod review;
pub mod runner;
pub mod scheduler;
pub mod signals;

use crate::storage::{Storage, StorageError};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Worktree(#[from] crate::worktree::WorktreeError),

    #[error(transparent)]
    Merge(#[from] crate::merge::MergeError),

    #[error(transparent)]
    Supervisor(#[from] crate::acp::supervisor::SupervisorError),

    #[error(transparent)]
    Backend(#[from] crate::acp::registry::BackendError),

    #[error("no repo associated with project {0}")]
    NoRepoForProject(String),
}

/// Orchestrator knobs, read fresh from `settings` at the top of every tick
/// so a client's `settings.update` call takes effect on the next tick
/// without a restart.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub auto_start: bool,
    pub max_concurrent_agents: u32,
    pub max_iterations: u32,
    pub auto_review: bool,
    pub auto_approve: bool,
    pub iteration_delay_seconds: u64,
    pub serialize_merges: bool,
    pub worktree_base_strategy: crate::worktree::BaseRefStrategy,
    pub agent_timeout_seconds: u64,
}

impl AutomationConfig {
    pub fn load(storage: &Storage) -> Result<Self, StorageError> {
        let get_bool = |key: &str, default: bool| -> bool {
            storage
                .get_setting(key)
                .ok()
                .flatten()
                .and_then(|v| v.as_bool())
                .unwrap_or(default)
        };
        let get_u32 = |key: &str, default: u32| -> u32 {
            storage
                .get_setting(key)
                .ok()
                .flatten()
                .and_then(|v| v.as_u64())
                .map(|n| n as u32)
                .unwrap_or(default)
        };
        let strategy = storage
            .get_setting("worktree_base_strategy")?
            .and_then(|v: Value| v.as_str().map(crate::worktree::BaseRefStrategy::from_str))
            .unwrap_or(crate::worktree::BaseRefStrategy::Remote);

        Ok(Self {
            auto_start: get_bool("auto_start", false),
            max_concurrent_agents: get_u32("max_concurrent_agents", 2),
            max_iterations: get_u32("max_iterations", 5),
            auto_review: get_bool("auto_review", false),
            auto_approve: get_bool("auto_approve", false),
            iteration_delay_seconds: get_u32("iteration_delay_seconds", 5) as u64,
            serialize_merges: get_bool("serialize_merges", true),
            worktree_base_strategy: strategy,
            agent_timeout_seconds: 120,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_setting_defaults() {
        let storage = Storage::open_in_memory().unwrap();
        let config = AutomationConfig::load(&storage).unwrap();
        assert!(!config.auto_start);
        assert_eq!(config.max_concurrent_agents, 2);
        assert_eq!(config.max_iterations, 5);
    }
}
