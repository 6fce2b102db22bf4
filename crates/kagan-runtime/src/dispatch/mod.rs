//! Capability Dispatch (spec §4.5): the `(capability, method) -> handler`
//! table every `CoreRequest` resolves through before hitting storage, the
//! runtime registry, or a plugin. Grounded on the teacher's
//! `factory/api.rs` request-handler layer (`ApiError` central error enum,
//! one function per endpoint, a shared `AppState`) adapted from HTTP
//! routes to capability/method pairs and from axum extractors to raw
//! `serde_json::Map` params, since the wire format here is the NDJSON
//! envelope in `kagan_wire::envelope` rather than REST.
//!
//! Every subsystem error funnels through [`DispatchError`] and is mapped to
//! exactly one [`ErrorCode`] here — the single boundary spec §4.4 requires
//! ("uncaught exceptions become INTERNAL_ERROR ... never internals").

mod audit;
mod diagnostics;
mod jobs;
mod projects;
mod review;
mod sessions;
mod settings;
mod tasks;

use crate::events::EventBus;
use crate::idempotency::{IdempotencyCache, Lookup, is_idempotent_method};
use crate::instrumentation::{Instrumentation, timed};
use crate::jobs::{JobError, SharedJobService};
use crate::plugins::{PluginError, PluginRegistry};
use crate::queued_messages::QueuedMessageService;
use crate::registry::SharedRegistry;
use crate::storage::{Storage, StorageError};
use kagan_wire::{CoreRequest, CoreResponse, ErrorCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Everything a handler needs, bundled once at startup and shared across
/// connections (spec §4.4's "one task per connection" model means this is
/// read concurrently from many tokio tasks; every field here is already
/// internally synchronized).
pub struct DispatchContext {
    pub storage: Arc<Storage>,
    pub registry: SharedRegistry,
    pub events: Arc<EventBus>,
    pub idempotency: Arc<IdempotencyCache>,
    pub jobs: SharedJobService,
    pub queued_messages: Arc<QueuedMessageService>,
    pub plugins: Arc<PluginRegistry>,
    pub instrumentation: Arc<Instrumentation>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Worktree(#[from] crate::worktree::WorktreeError),

    #[error(transparent)]
    Merge(#[from] crate::merge::MergeError),

    #[error(transparent)]
    Backend(#[from] crate::acp::registry::BackendError),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("unsupported method {method} for capability {capability}")]
    UnsupportedMethod { capability: String, method: String },
}

impl DispatchError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::Storage(StorageError::NotFound { entity, .. }) => match *entity {
                "task" => ErrorCode::TaskNotFound,
                "workspace" => ErrorCode::WorkspaceNotFound,
                _ => ErrorCode::NotFound,
            },
            Self::Storage(StorageError::InvalidTransition { .. }) => ErrorCode::ValidationError,
            Self::Storage(StorageError::TaskTypeMismatch { .. }) => ErrorCode::TaskTypeMismatch,
            Self::Storage(StorageError::Sqlite(_)) | Self::Storage(StorageError::Serde(_)) => ErrorCode::InternalError,
            Self::Job(JobError::NotFound(_)) => ErrorCode::JobNotFound,
            Self::Job(JobError::UnsupportedAction(_)) => ErrorCode::UnsupportedAction,
            Self::Job(JobError::TaskTypeMismatch(_)) => ErrorCode::TaskTypeMismatch,
            Self::Job(JobError::Storage(inner)) => Self::Storage(clone_storage_error(inner)).error_code(),
            Self::Plugin(err) => err.code,
            Self::Worktree(crate::worktree::WorktreeError::Conflict { .. }) => ErrorCode::MergeConflict,
            Self::Worktree(crate::worktree::WorktreeError::AlreadyExists(_)) => ErrorCode::InvalidWorktreePath,
            Self::Worktree(_) => ErrorCode::InternalError,
            Self::Merge(crate::merge::MergeError::Conflict { .. }) => ErrorCode::MergeConflict,
            Self::Merge(_) => ErrorCode::InternalError,
            Self::Backend(_) => ErrorCode::InvalidArgument,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::UnknownCapability(_) => ErrorCode::UnsupportedAction,
            Self::UnsupportedMethod { .. } => ErrorCode::UnsupportedAction,
        }
    }
}

/// `StorageError` isn't `Clone`; this rebuilds just enough of it to reuse
/// the mapping above for the wrapped variant inside `JobError::Storage`.
fn clone_storage_error(err: &StorageError) -> StorageError {
    match err {
        StorageError::NotFound { entity, id } => StorageError::NotFound { entity, id: id.clone() },
        StorageError::InvalidTransition { task_id, from, to } => StorageError::InvalidTransition {
            task_id: task_id.clone(),
            from: from.clone(),
            to: to.clone(),
        },
        StorageError::TaskTypeMismatch { task_id } => StorageError::TaskTypeMismatch { task_id: task_id.clone() },
        StorageError::Sqlite(_) | StorageError::Serde(_) => StorageError::NotFound {
            entity: "unknown",
            id: String::new(),
        },
    }
}

pub(crate) type HandlerResult = Result<Map<String, Value>, DispatchError>;

// ── Param extraction helpers ─────────────────────────────────────────
//
// Handlers get raw params (spec §4.5): missing/malformed required fields
// are this layer's job to reject with VALIDATION_ERROR before a subsystem
// ever sees them.

pub(crate) fn require_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, DispatchError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::Validation(format!("missing required param `{key}`")))
}

pub(crate) fn optional_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn require_i64(params: &Map<String, Value>, key: &str) -> Result<i64, DispatchError> {
    params
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| DispatchError::Validation(format!("missing required param `{key}`")))
}

pub(crate) fn optional_u64(params: &Map<String, Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

pub(crate) fn optional_bool(params: &Map<String, Value>, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

pub(crate) fn optional_string_array(params: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    params.get(key)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

pub(crate) fn to_value_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Resolves a request to its handler, applying idempotency-key dedup for
/// mutation methods on the allow-list (spec §4.6) before running it.
pub async fn dispatch(ctx: &DispatchContext, request: CoreRequest) -> CoreResponse {
    let verb = request.method.rsplit('.').next().unwrap_or(request.method.as_str());
    if is_idempotent_method(verb) {
        if let Some(key) = request.idempotency_key.clone() {
            let fingerprint =
                IdempotencyCache::fingerprint(&request.capability, &request.method, &key, &request.session_id);
            loop {
                match ctx.idempotency.begin(&fingerprint) {
                    Lookup::Hit(response) => return response,
                    Lookup::InFlight(notify) => {
                        notify.notified().await;
                        continue;
                    }
                    Lookup::Miss => {
                        let response = handle(ctx, &request).await;
                        ctx.idempotency.complete(&fingerprint, response.clone());
                        return response;
                    }
                }
            }
        }
    }
    handle(ctx, &request).await
}

async fn handle(ctx: &DispatchContext, request: &CoreRequest) -> CoreResponse {
    let label = format!("dispatch.{}.{}", request.capability, request.method);
    let outcome = timed(&ctx.instrumentation, &label, || route(ctx, request)).await;
    let summary = match &outcome {
        Ok(_) => "ok".to_string(),
        Err(err) => err.error_code().to_string(),
    };
    let _ = ctx
        .storage
        .record_audit(&request.session_id, &request.capability, &request.method, &summary);
    match outcome {
        Ok(result) => CoreResponse::success(request.request_id.clone(), result),
        Err(err) => CoreResponse::failure(request.request_id.clone(), err.error_code(), err.to_string()),
    }
}

async fn route(ctx: &DispatchContext, request: &CoreRequest) -> HandlerResult {
    match request.capability.as_str() {
        "tasks" => tasks::dispatch(ctx, &request.method, &request.params).await,
        "review" => review::dispatch(ctx, &request.method, &request.params).await,
        "jobs" => jobs::dispatch(ctx, &request.method, &request.params).await,
        "sessions" => sessions::dispatch(ctx, &request.method, &request.params).await,
        "projects" => projects::dispatch(ctx, &request.method, &request.params).await,
        "settings" => settings::dispatch(ctx, &request.method, &request.params).await,
        "audit" => audit::dispatch(ctx, &request.method, &request.params).await,
        "diagnostics" => diagnostics::dispatch(ctx, &request.method, &request.params).await,
        other => {
            if let Some(handler) = ctx.plugins.lookup(other, &request.method) {
                let result = handler(request.params.clone()).await?;
                Ok(to_value_map(result))
            } else {
                Err(DispatchError::UnknownCapability(other.to_string()))
            }
        }
    }
}

/// Shared `DispatchContext` builder for submodule unit tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub(crate) fn context() -> DispatchContext {
        DispatchContext {
            storage: Arc::new(Storage::open_in_memory().unwrap()),
            registry: Arc::new(crate::registry::RuntimeRegistry::new()),
            events: Arc::new(EventBus::new()),
            idempotency: Arc::new(IdempotencyCache::default()),
            jobs: Arc::new(crate::jobs::JobService::new()),
            queued_messages: Arc::new(QueuedMessageService::new()),
            plugins: Arc::new(PluginRegistry::new()),
            instrumentation: Arc::new(Instrumentation::disabled()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::context;
    use super::*;
    use kagan_wire::{SessionOrigin, SessionProfile};

    fn request(capability: &str, method: &str, params: Map<String, Value>) -> CoreRequest {
        CoreRequest {
            request_id: "req-1".to_string(),
            session_id: "sess-1".to_string(),
            session_profile: SessionProfile::Operator,
            session_origin: SessionOrigin::Tui,
            client_version: None,
            capability: capability.to_string(),
            method: method.to_string(),
            params,
            idempotency_key: None,
            bearer_token: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_capability_is_unsupported_action() {
        let ctx = context();
        let response = dispatch(&ctx, request("bogus", "noop", Map::new())).await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "UNSUPPORTED_ACTION");
    }

    #[tokio::test]
    async fn idempotency_key_dedups_repeated_creates() {
        let ctx = context();
        let project = ctx.storage.create_project("P", None).unwrap();
        let mut params = Map::new();
        params.insert("project_id".to_string(), Value::String(project.id.clone()));
        params.insert("title".to_string(), Value::String("T".to_string()));

        let mut req = request("tasks", "create", params);
        req.idempotency_key = Some("k1".to_string());

        let first = dispatch(&ctx, req.clone()).await;
        let second = dispatch(&ctx, req).await;
        assert_eq!(first.result, second.result);
        assert_eq!(ctx.storage.list_tasks(Some(&project.id)).unwrap().len(), 1);
    }
}
