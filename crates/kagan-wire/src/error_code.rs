//! The closed, machine-readable error code set from spec §4.3/§7.
//!
//! Kept as a single enum (rather than free-form strings) so the dispatch
//! layer cannot accidentally invent a new code a client has never seen.
//! Capability-specific codes are included here too; the set is closed but
//! wide, matching "plus capability-specific codes" in the spec.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Protocol errors (connection-fatal)
    ParseError,
    AuthFailed,
    ValidationError,

    // Generic domain errors
    InternalError,
    NotFound,
    InvalidArgument,
    UnsupportedAction,
    Timeout,

    // Task capability
    TaskNotFound,
    InvalidTaskId,
    TaskTypeMismatch,

    // Workspace / worktree
    WorkspaceNotFound,
    InvalidWorktreePath,

    // Job capability
    JobNotFound,
    JobTimeout,

    // GitHub plugin
    GhCliNotAvailable,
    GhSyncFailed,
    GhNotAuthenticated,
    GhNoRemote,

    // ACP / agents
    AgentFailedToStart,
    AgentFailed,
    RpcError,

    // Merge
    MergeConflict,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::AuthFailed => "AUTH_FAILED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnsupportedAction => "UNSUPPORTED_ACTION",
            Self::Timeout => "TIMEOUT",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::InvalidTaskId => "INVALID_TASK_ID",
            Self::TaskTypeMismatch => "TASK_TYPE_MISMATCH",
            Self::WorkspaceNotFound => "WORKSPACE_NOT_FOUND",
            Self::InvalidWorktreePath => "INVALID_WORKTREE_PATH",
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::JobTimeout => "JOB_TIMEOUT",
            Self::GhCliNotAvailable => "GH_CLI_NOT_AVAILABLE",
            Self::GhSyncFailed => "GH_SYNC_FAILED",
            Self::GhNotAuthenticated => "GH_NOT_AUTHENTICATED",
            Self::GhNoRemote => "GH_NO_REMOTE",
            Self::AgentFailedToStart => "AGENT_FAILED_TO_START",
            Self::AgentFailed => "AGENT_FAILED",
            Self::RpcError => "RPC_ERROR",
            Self::MergeConflict => "MERGE_CONFLICT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::TaskNotFound).unwrap();
        assert_eq!(json, "\"TASK_NOT_FOUND\"");
    }

    #[test]
    fn round_trips_through_json() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::AuthFailed,
            ErrorCode::JobTimeout,
            ErrorCode::GhCliNotAvailable,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(code, back);
        }
    }
}
