//! Domain events published on the in-process event bus (spec §4.7).
//!
//! Every event carries `event_id` and `occurred_at` plus event-specific
//! fields. Modeled as a tagged enum rather than the teacher's inheritance
//! style base class, dispatched by pattern match at subscribers.

use crate::ids::new_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DomainEvent {
    TaskCreated {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        project_id: String,
    },
    TaskUpdated {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        changed_fields: Vec<String>,
    },
    TaskStatusChanged {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        from: String,
        to: String,
        reason: String,
    },
    TaskDeleted {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
    },
    AutomationTaskStarted {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        execution_id: String,
    },
    AutomationAgentAttached {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        execution_id: String,
        agent_identity: String,
    },
    AutomationReviewAgentAttached {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        execution_id: String,
        agent_identity: String,
    },
    AutomationTaskEnded {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        outcome: String,
        reason: Option<String>,
    },
    MergeCompleted {
        event_id: String,
        occurred_at: DateTime<Utc>,
        workspace_id: String,
        repo_id: String,
        target: String,
        merge_commit: String,
    },
    MergeFailed {
        event_id: String,
        occurred_at: DateTime<Utc>,
        workspace_id: String,
        repo_id: String,
        error: String,
        conflict_files: Vec<String>,
    },
    PrCreated {
        event_id: String,
        occurred_at: DateTime<Utc>,
        task_id: String,
        pr_url: String,
        pr_number: i64,
    },
    JobSubmitted {
        event_id: String,
        occurred_at: DateTime<Utc>,
        job_id: String,
        task_id: String,
        action: String,
    },
    CoreHostRunning {
        event_id: String,
        occurred_at: DateTime<Utc>,
    },
    CoreHostDraining {
        event_id: String,
        occurred_at: DateTime<Utc>,
        reason: String,
    },
    CoreHostStopped {
        event_id: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn event_id(&self) -> &str {
        match self {
            Self::TaskCreated { event_id, .. }
            | Self::TaskUpdated { event_id, .. }
            | Self::TaskStatusChanged { event_id, .. }
            | Self::TaskDeleted { event_id, .. }
            | Self::AutomationTaskStarted { event_id, .. }
            | Self::AutomationAgentAttached { event_id, .. }
            | Self::AutomationReviewAgentAttached { event_id, .. }
            | Self::AutomationTaskEnded { event_id, .. }
            | Self::MergeCompleted { event_id, .. }
            | Self::MergeFailed { event_id, .. }
            | Self::PrCreated { event_id, .. }
            | Self::JobSubmitted { event_id, .. }
            | Self::CoreHostRunning { event_id, .. }
            | Self::CoreHostDraining { event_id, .. }
            | Self::CoreHostStopped { event_id, .. } => event_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskUpdated { .. } => "TaskUpdated",
            Self::TaskStatusChanged { .. } => "TaskStatusChanged",
            Self::TaskDeleted { .. } => "TaskDeleted",
            Self::AutomationTaskStarted { .. } => "AutomationTaskStarted",
            Self::AutomationAgentAttached { .. } => "AutomationAgentAttached",
            Self::AutomationReviewAgentAttached { .. } => "AutomationReviewAgentAttached",
            Self::AutomationTaskEnded { .. } => "AutomationTaskEnded",
            Self::MergeCompleted { .. } => "MergeCompleted",
            Self::MergeFailed { .. } => "MergeFailed",
            Self::PrCreated { .. } => "PrCreated",
            Self::JobSubmitted { .. } => "JobSubmitted",
            Self::CoreHostRunning { .. } => "CoreHostRunning",
            Self::CoreHostDraining { .. } => "CoreHostDraining",
            Self::CoreHostStopped { .. } => "CoreHostStopped",
        }
    }
}

/// Convenience constructors that stamp `event_id`/`occurred_at` so call
/// sites never forget them.
pub fn task_status_changed(
    task_id: impl Into<String>,
    from: impl Into<String>,
    to: impl Into<String>,
    reason: impl Into<String>,
) -> DomainEvent {
    DomainEvent::TaskStatusChanged {
        event_id: new_id(),
        occurred_at: Utc::now(),
        task_id: task_id.into(),
        from: from.into(),
        to: to.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let ev = task_status_changed("task-1", "backlog", "in_progress", "user started");
        let json = serde_json::to_string(&ev).unwrap();
        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
        assert_eq!(back.kind(), "TaskStatusChanged");
    }

    #[test]
    fn event_id_is_non_empty_for_every_variant() {
        let ev = DomainEvent::CoreHostRunning {
            event_id: new_id(),
            occurred_at: Utc::now(),
        };
        assert!(!ev.event_id().is_empty());
    }
}
