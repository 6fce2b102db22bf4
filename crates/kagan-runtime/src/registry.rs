//! Runtime Registry (spec §4.9): in-memory `task_id -> RuntimeTaskView`,
//! guarded by a `DashMap` since mutators run from several tokio tasks
//! (scheduler tick, per-task loops, dispatch handlers) rather than strictly
//! on one event loop thread.

use crate::storage::Storage;
use kagan_common::{RuntimePhase, RuntimeTaskView, TaskStatus};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no runtime view for task {0}")]
    NoView(String),

    #[error("illegal phase transition for task {task_id}: {from:?} -> {attempted}")]
    IllegalTransition {
        task_id: String,
        from: RuntimePhase,
        attempted: &'static str,
    },
}

#[derive(Default)]
pub struct RuntimeRegistry {
    views: DashMap<String, RuntimeTaskView>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<RuntimeTaskView> {
        self.views.get(task_id).map(|v| v.clone())
    }

    /// Consumers treat a missing view as "idle, not running" rather than an
    /// error (spec §4.9 query API contract).
    pub fn snapshot_for_task(&self, task_id: &str) -> RuntimeTaskView {
        self.get(task_id).unwrap_or_else(|| RuntimeTaskView::idle(task_id))
    }

    pub fn start(&self, task_id: &str, execution_id: &str) {
        let mut view = self
            .views
            .entry(task_id.to_string())
            .or_insert_with(|| RuntimeTaskView::idle(task_id));
        view.phase = Some(RuntimePhase::Running);
        view.execution_id = Some(execution_id.to_string());
        view.run_count += 1;
    }

    pub fn attach_running_agent(&self, task_id: &str, agent_identity: &str) {
        if let Some(mut view) = self.views.get_mut(task_id) {
            view.running_agent = Some(agent_identity.to_string());
        }
    }

    pub fn request_review(&self, task_id: &str) {
        if let Some(mut view) = self.views.get_mut(task_id) {
            view.phase = Some(RuntimePhase::Reviewing);
        }
    }

    pub fn attach_review_agent(&self, task_id: &str, agent_identity: &str) {
        if let Some(mut view) = self.views.get_mut(task_id) {
            view.review_agent = Some(agent_identity.to_string());
        }
    }

    /// Tears down the view, per spec.md §3's "Created lazily when automation
    /// enters RUNNING; torn down on terminal transition."
    pub fn end(&self, task_id: &str) {
        self.views.remove(task_id);
    }

    pub fn mark_blocked(&self, task_id: &str, reason: &str) {
        let mut view = self
            .views
            .entry(task_id.to_string())
            .or_insert_with(|| RuntimeTaskView::idle(task_id));
        view.blocked_reason = Some(reason.to_string());
        view.blocked_at = Some(chrono::Utc::now());
        view.phase = Some(RuntimePhase::Blocked);
    }

    /// Restores the phase the view had before `mark_blocked`, defaulting to
    /// idle if none is recoverable (we don't track a phase stack; blocked
    /// tasks in this orchestrator only ever arise from RUNNING or REVIEWING
    /// and are always torn down via `end`, not resumed in place).
    pub fn unblock(&self, task_id: &str, previous: RuntimePhase) {
        if let Some(mut view) = self.views.get_mut(task_id) {
            view.phase = Some(previous);
            view.blocked_reason = None;
            view.blocked_at = None;
        }
    }

    pub fn mark_pending(&self, task_id: &str, reason: &str) {
        let mut view = self
            .views
            .entry(task_id.to_string())
            .or_insert_with(|| RuntimeTaskView::idle(task_id));
        view.phase = Some(RuntimePhase::Pending);
        view.pending_reason = Some(reason.to_string());
        view.pending_at = Some(chrono::Utc::now());
    }

    pub fn running_count(&self) -> usize {
        self.views
            .iter()
            .filter(|v| matches!(v.phase, Some(RuntimePhase::Running) | Some(RuntimePhase::Reviewing)))
            .count()
    }

    pub fn has_view(&self, task_id: &str) -> bool {
        self.views.contains_key(task_id)
    }

    /// Startup reconciliation (spec §4.9): every running-but-unregistered
    /// execution is marked COMPLETED with dropped=true (log may be
    /// incomplete); every AUTO task still IN_PROGRESS is returned so the
    /// orchestrator can offer it for resumption.
    pub fn reconcile_on_startup(storage: &Storage) -> Result<Vec<String>, crate::storage::StorageError> {
        let dropped_execution_ids = storage.mark_orphaned_executions_dropped()?;
        for execution_id in &dropped_execution_ids {
            tracing::warn!(execution_id, "marked orphaned execution dropped on startup");
        }
        let resumable = storage
            .list_tasks(None)?
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress && t.task_type == kagan_common::TaskType::Auto)
            .map(|t| t.id)
            .collect();
        Ok(resumable)
    }
}

pub type SharedRegistry = Arc<RuntimeRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_view_reports_idle() {
        let registry = RuntimeRegistry::new();
        let snapshot = registry.snapshot_for_task("task-1");
        assert_eq!(snapshot.phase, Some(RuntimePhase::Idle));
    }

    #[test]
    fn start_then_end_tears_down_view() {
        let registry = RuntimeRegistry::new();
        registry.start("task-1", "exec-1");
        assert!(registry.has_view("task-1"));
        assert_eq!(registry.running_count(), 1);
        registry.end("task-1");
        assert!(!registry.has_view("task-1"));
    }

    #[test]
    fn mark_blocked_records_reason_and_timestamp() {
        let registry = RuntimeRegistry::new();
        registry.start("task-1", "exec-1");
        registry.mark_blocked("task-1", "need credentials");
        let view = registry.get("task-1").unwrap();
        assert_eq!(view.phase, Some(RuntimePhase::Blocked));
        assert_eq!(view.blocked_reason.as_deref(), Some("need credentials"));
    }

    #[test]
    fn running_count_only_counts_running_and_reviewing() {
        let registry = RuntimeRegistry::new();
        registry.start("task-1", "exec-1");
        registry.start("task-2", "exec-2");
        registry.mark_blocked("task-2", "x");
        assert_eq!(registry.running_count(), 1);
    }
}
