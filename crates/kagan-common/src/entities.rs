//! Core entity types shared between storage, the runtime registry, and the
//! IPC layer. These are plain data — no I/O, no locking — so that every
//! crate in the workspace can depend on them without pulling in tokio or
//! rusqlite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Repo {
    pub id: String,
    pub name: String,
    /// Canonical filesystem path.
    pub path: String,
    pub default_branch: String,
    pub display_name: Option<String>,
    pub default_working_dir: Option<String>,
    /// Opaque string->string map used by plugins for persisted metadata
    /// (e.g. the GitHub plugin's connection state).
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectRepo {
    pub project_id: String,
    pub repo_id: String,
    pub is_primary: bool,
    pub display_order: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            other => Err(format!("invalid task status: {other}")),
        }
    }

    /// Canonical transition table from spec §4.8.
    pub fn allows_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (*self, to),
            (Backlog, InProgress)
                | (InProgress, Backlog)
                | (InProgress, Review)
                | (Review, InProgress)
                | (Review, Done)
                | (Review, Backlog)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Pair,
    Auto,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pair => "pair",
            Self::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "pair" => Ok(Self::Pair),
            "auto" => Ok(Self::Auto),
            other => Err(format!("invalid task type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub task_type: TaskType,
    pub assigned_hat: Option<String>,
    pub agent_backend: Option<String>,
    pub base_branch: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// AUTO tasks are eligible for orchestrator spawn only while IN_PROGRESS;
    /// PAIR tasks are never spawned by the orchestrator.
    pub fn is_auto_spawn_eligible(&self) -> bool {
        self.task_type == TaskType::Auto && self.status == TaskStatus::InProgress
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Active,
    Archived,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("invalid workspace status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: String,
    pub project_id: String,
    pub task_id: Option<String>,
    pub branch_name: String,
    pub path: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceRepo {
    pub workspace_id: String,
    pub repo_id: String,
    pub target_branch: String,
    pub worktree_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Acp,
    TerminalAttach,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acp => "acp",
            Self::TerminalAttach => "terminal_attach",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "acp" => Ok(Self::Acp),
            "terminal_attach" => Ok(Self::TerminalAttach),
            other => Err(format!("invalid session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(format!("invalid session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub external_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    CodingAgent,
    Review,
    FollowUp,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodingAgent => "codingagent",
            Self::Review => "review",
            Self::FollowUp => "follow_up",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "codingagent" => Ok(Self::CodingAgent),
            "review" => Ok(Self::Review),
            "follow_up" => Ok(Self::FollowUp),
            other => Err(format!("invalid run reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("invalid execution status: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionProcess {
    pub id: String,
    pub session_id: String,
    pub run_reason: RunReason,
    #[serde(default)]
    pub executor_action: serde_json::Value,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub dropped: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodingAgentTurn {
    pub id: String,
    pub execution_id: String,
    pub prompt: String,
    pub summary: String,
    pub agent_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    Direct,
    Pr,
}

impl MergeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Pr => "pr",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "direct" => Ok(Self::Direct),
            "pr" => Ok(Self::Pr),
            other => Err(format!("invalid merge type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Merged,
    Closed,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Merged => "merged",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "open" => Ok(Self::Open),
            "merged" => Ok(Self::Merged),
            "closed" => Ok(Self::Closed),
            other => Err(format!("invalid pr status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Merge {
    pub id: String,
    pub workspace_id: String,
    pub repo_id: String,
    pub merge_type: MergeType,
    pub target_branch: String,
    pub merge_commit: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_status: Option<PrStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scratch {
    pub task_id: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// In-memory-only runtime phase of a task's automation. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    Idle,
    Running,
    Reviewing,
    Blocked,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RuntimeTaskView {
    pub task_id: String,
    pub phase: Option<RuntimePhase>,
    pub execution_id: Option<String>,
    pub run_count: u32,
    pub running_agent: Option<String>,
    pub review_agent: Option<String>,
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub blocked_by_task_ids: Vec<String>,
    #[serde(default)]
    pub overlap_hints: Vec<String>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub pending_reason: Option<String>,
    pub pending_at: Option<DateTime<Utc>>,
}

impl RuntimeTaskView {
    pub fn idle(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase: Some(RuntimePhase::Idle),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    StartAgent,
    StopAgent,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartAgent => "start_agent",
            Self::StopAgent => "stop_agent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start_agent" => Some(Self::StartAgent),
            "stop_agent" => Some(Self::StopAgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub task_id: String,
    pub action: JobAction,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub job_id: String,
    pub seq: u64,
    pub occurred_at: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Lanes used by the queued-message service (spec §4.15).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Implementation,
    Review,
    Planner,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::Planner => "planner",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub content: String,
    pub author: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_transitions_match_spec_table() {
        assert!(TaskStatus::Backlog.allows_transition(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.allows_transition(TaskStatus::Backlog));
        assert!(TaskStatus::InProgress.allows_transition(TaskStatus::Review));
        assert!(TaskStatus::Review.allows_transition(TaskStatus::InProgress));
        assert!(TaskStatus::Review.allows_transition(TaskStatus::Done));
        assert!(TaskStatus::Review.allows_transition(TaskStatus::Backlog));

        assert!(!TaskStatus::Backlog.allows_transition(TaskStatus::Review));
        assert!(!TaskStatus::Backlog.allows_transition(TaskStatus::Done));
        assert!(!TaskStatus::Done.allows_transition(TaskStatus::Review));
        assert!(!TaskStatus::InProgress.allows_transition(TaskStatus::Done));
    }

    #[test]
    fn task_status_round_trips_through_str() {
        for s in [
            TaskStatus::Backlog,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
        ] {
            assert_eq!(TaskStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn auto_task_spawn_eligibility() {
        let base = Task {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "x".into(),
            description: "".into(),
            status: TaskStatus::InProgress,
            priority: Priority::Medium,
            task_type: TaskType::Auto,
            assigned_hat: None,
            agent_backend: None,
            base_branch: None,
            acceptance_criteria: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(base.is_auto_spawn_eligible());

        let mut pair = base.clone();
        pair.task_type = TaskType::Pair;
        assert!(!pair.is_auto_spawn_eligible());

        let mut backlog = base;
        backlog.status = TaskStatus::Backlog;
        assert!(!backlog.is_auto_spawn_eligible());
    }
}
