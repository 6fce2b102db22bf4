//! Job Service (spec §4.16): a thin lifecycle envelope over the two
//! supported actions, `start_agent` and `stop_agent`, so clients get a
//! pollable record instead of blocking the connection for the whole
//! automation run.

use crate::events::EventBus;
use crate::registry::SharedRegistry;
use crate::storage::Storage;
use dashmap::DashMap;
use kagan_common::{DomainEvent, JobAction, JobEvent, JobRecord, JobStatus, TaskType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Duration;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("task type mismatch: {0}")]
    TaskTypeMismatch(String),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

/// Closed set of action names this service recognizes; anything else is
/// `UNSUPPORTED_ACTION` with this list as the remediation hint.
pub const VALID_ACTIONS: &[&str] = &["start_agent", "stop_agent"];

struct JobState {
    record: JobRecord,
    events: Vec<JobEvent>,
}

#[derive(Default)]
pub struct JobService {
    jobs: DashMap<String, Mutex<JobState>>,
    seq: AtomicU64,
}

impl JobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues the job, runs `execute_job_action` to a terminal or
    /// `RUNNING` outcome, and emits `JobSubmitted`.
    pub async fn submit(
        &self,
        storage: &Storage,
        registry: &SharedRegistry,
        events: &EventBus,
        task_id: &str,
        action: &str,
        params: serde_json::Value,
    ) -> Result<JobRecord, JobError> {
        let Some(action_kind) = JobAction::from_str(action) else {
            return Err(JobError::UnsupportedAction(action.to_string()));
        };

        let job_id = kagan_common::new_id();
        let now = chrono::Utc::now();
        let record = JobRecord {
            job_id: job_id.clone(),
            task_id: task_id.to_string(),
            action: action_kind,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            params: params.clone(),
            result: None,
        };
        self.jobs.insert(
            job_id.clone(),
            Mutex::new(JobState {
                record: record.clone(),
                events: Vec::new(),
            }),
        );
        events.publish(DomainEvent::JobSubmitted {
            event_id: kagan_common::new_id(),
            occurred_at: now,
            job_id: job_id.clone(),
            task_id: task_id.to_string(),
            action: action.to_string(),
        });

        self.set_running(&job_id).await;
        let outcome = execute_job_action(storage, registry, task_id, action_kind, &params).await;
        match outcome {
            Ok(JobOutcome::Succeeded(result)) => self.finish(&job_id, JobStatus::Succeeded, Some(result)).await,
            Ok(JobOutcome::StillRunning) => {}
            Err(err) => {
                self.finish(&job_id, JobStatus::Failed, Some(serde_json::json!({"error": err.to_string()})))
                    .await
            }
        }
        Ok(self.get(&job_id).await)
    }

    async fn set_running(&self, job_id: &str) {
        if let Some(entry) = self.jobs.get(job_id) {
            let mut state = entry.lock().await;
            state.record.status = JobStatus::Running;
            state.record.updated_at = chrono::Utc::now();
        }
    }

    async fn finish(&self, job_id: &str, status: JobStatus, result: Option<serde_json::Value>) {
        if let Some(entry) = self.jobs.get(job_id) {
            let mut state = entry.lock().await;
            state.record.status = status;
            state.record.result = result;
            state.record.updated_at = chrono::Utc::now();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            state.events.push(JobEvent {
                job_id: job_id.to_string(),
                seq,
                occurred_at: chrono::Utc::now(),
                message: format!("job {status:?}"),
                data: serde_json::Value::Null,
            });
        }
    }

    pub async fn get(&self, job_id: &str) -> JobRecord {
        match self.jobs.get(job_id) {
            Some(entry) => entry.lock().await.record.clone(),
            None => panic!("get called on missing job"),
        }
    }

    pub async fn try_get(&self, job_id: &str) -> Result<JobRecord, JobError> {
        match self.jobs.get(job_id) {
            Some(entry) => Ok(entry.lock().await.record.clone()),
            None => Err(JobError::NotFound(job_id.to_string())),
        }
    }

    pub async fn cancel(&self, job_id: &str) -> Result<JobRecord, JobError> {
        let entry = self.jobs.get(job_id).ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let mut state = entry.lock().await;
        if !state.record.status.is_terminal() {
            state.record.status = JobStatus::Canceled;
            state.record.updated_at = chrono::Utc::now();
        }
        Ok(state.record.clone())
    }

    /// Polls until the job reaches a terminal status or `timeout_seconds`
    /// elapses, in which case the returned record keeps its non-terminal
    /// status and the caller attaches `timed_out=true`/`JOB_TIMEOUT`.
    pub async fn wait(&self, job_id: &str, timeout_seconds: u64) -> Result<(JobRecord, bool), JobError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
        loop {
            let record = self.try_get(job_id).await?;
            if record.status.is_terminal() {
                return Ok((record, false));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok((record, true));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn events(&self, job_id: &str, offset: usize, limit: usize) -> Result<Vec<JobEvent>, JobError> {
        let entry = self.jobs.get(job_id).ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let state = entry.lock().await;
        Ok(state.events.iter().skip(offset).take(limit).cloned().collect())
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(serde_json::Value),
    StillRunning,
}

/// Dispatches a job action to its implementation. `start_agent` only
/// accepts AUTO tasks (spec §4.16); the orchestrator scheduler owns the
/// actual spawn, so this just flips the task to `IN_PROGRESS` and lets the
/// next tick pick it up, returning the resulting runtime snapshot.
pub async fn execute_job_action(
    storage: &Storage,
    registry: &SharedRegistry,
    task_id: &str,
    action: JobAction,
    _params: &serde_json::Value,
) -> Result<JobOutcome, JobError> {
    match action {
        JobAction::StartAgent => {
            let task = storage.get_task(task_id)?;
            if task.task_type != TaskType::Auto {
                return Err(JobError::TaskTypeMismatch(task_id.to_string()));
            }
            if task.status != kagan_common::TaskStatus::InProgress {
                storage.move_task(task_id, kagan_common::TaskStatus::InProgress, Some("start_agent job"))?;
            }
            let snapshot = registry.snapshot_for_task(task_id);
            Ok(JobOutcome::Succeeded(serde_json::to_value(snapshot).unwrap_or_default()))
        }
        JobAction::StopAgent => {
            registry.end(task_id);
            Ok(JobOutcome::Succeeded(serde_json::json!({"stopped": true})))
        }
    }
}

pub type SharedJobService = Arc<JobService>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuntimeRegistry;

    #[tokio::test]
    async fn start_agent_rejects_pair_tasks() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.create_project("P", None).unwrap();
        let task = storage
            .create_task(crate::storage::NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: kagan_common::Priority::Medium,
                task_type: TaskType::Pair,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        let registry = Arc::new(RuntimeRegistry::new());
        let err = execute_job_action(&storage, &registry, &task.id, JobAction::StartAgent, &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::TaskTypeMismatch(_)));
    }

    #[tokio::test]
    async fn submit_unknown_action_is_unsupported() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let registry = Arc::new(RuntimeRegistry::new());
        let events = Arc::new(EventBus::new());
        let service = JobService::new();
        let err = service
            .submit(&storage, &registry, &events, "task-1", "bogus", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnsupportedAction(_)));
    }

    #[tokio::test]
    async fn wait_times_out_on_still_running_job() {
        let service = JobService::new();
        let job_id = "job-1".to_string();
        service.jobs.insert(
            job_id.clone(),
            Mutex::new(JobState {
                record: JobRecord {
                    job_id: job_id.clone(),
                    task_id: "t".into(),
                    action: JobAction::StartAgent,
                    status: JobStatus::Running,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                    params: serde_json::Value::Null,
                    result: None,
                },
                events: Vec::new(),
            }),
        );
        let (record, timed_out) = service.wait(&job_id, 0).await.unwrap();
        assert!(timed_out);
        assert_eq!(record.status, JobStatus::Running);
    }
}
