//! `projects` capability (spec §4.5/§4.8): create, open, add_repo, get,
//! list, repos, find_by_repo_path, repo_details.

use super::{DispatchContext, DispatchError, HandlerResult, optional_bool, optional_str, optional_u64, require_str};
use serde_json::{Map, Value};

pub(super) async fn dispatch(ctx: &DispatchContext, method: &str, params: &Map<String, Value>) -> HandlerResult {
    match method {
        "create" => create(ctx, params).await,
        "open" => open(ctx, params).await,
        "add_repo" => add_repo(ctx, params).await,
        "get" => get(ctx, params).await,
        "list" => list(ctx, params).await,
        "repos" => repos(ctx, params).await,
        "find_by_repo_path" => find_by_repo_path(ctx, params).await,
        "repo_details" => repo_details(ctx, params).await,
        other => Err(DispatchError::UnsupportedMethod {
            capability: "projects".to_string(),
            method: other.to_string(),
        }),
    }
}

async fn create(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let name = require_str(params, "name")?;
    let description = optional_str(params, "description");
    let project = ctx.storage.create_project(name, description)?;
    let mut result = Map::new();
    result.insert("project".to_string(), serde_json::to_value(project).unwrap_or(Value::Null));
    Ok(result)
}

async fn open(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = require_str(params, "project_id")?;
    ctx.storage.mark_project_opened(project_id)?;
    let project = ctx.storage.get_project(project_id)?;
    let mut result = Map::new();
    result.insert("project".to_string(), serde_json::to_value(project).unwrap_or(Value::Null));
    Ok(result)
}

/// Repos have no standalone `create` capability method (spec §4.5), so
/// `add_repo` creates the repo row on first use (matched by `path`) and
/// always (re-)links it to the project, mirroring `storage::add_repo_to_project`'s
/// upsert semantics.
async fn add_repo(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = require_str(params, "project_id")?;
    let path = require_str(params, "path")?;
    let name = require_str(params, "name")?;
    let default_branch = optional_str(params, "default_branch").unwrap_or("main");
    let display_name = optional_str(params, "display_name");
    let default_working_dir = optional_str(params, "default_working_dir");
    let is_primary = optional_bool(params, "is_primary").unwrap_or(false);
    let display_order = optional_u64(params, "display_order").unwrap_or(0) as i64;

    let repo = match ctx.storage.find_repo_by_path(path)? {
        Some(existing) => existing,
        None => ctx.storage.create_repo(name, path, default_branch, display_name, default_working_dir)?,
    };
    ctx.storage.add_repo_to_project(project_id, &repo.id, is_primary, display_order)?;
    let mut result = Map::new();
    result.insert("repo".to_string(), serde_json::to_value(repo).unwrap_or(Value::Null));
    Ok(result)
}

async fn get(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = require_str(params, "project_id")?;
    let project = ctx.storage.get_project(project_id)?;
    let mut result = Map::new();
    result.insert("project".to_string(), serde_json::to_value(project).unwrap_or(Value::Null));
    Ok(result)
}

async fn list(ctx: &DispatchContext, _params: &Map<String, Value>) -> HandlerResult {
    let projects = ctx.storage.list_projects()?;
    let mut result = Map::new();
    result.insert("projects".to_string(), serde_json::to_value(projects).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn repos(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let project_id = require_str(params, "project_id")?;
    let repos = ctx.storage.repos_for_project(project_id)?;
    let mut result = Map::new();
    result.insert("repos".to_string(), serde_json::to_value(repos).unwrap_or(Value::Array(vec![])));
    Ok(result)
}

async fn find_by_repo_path(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let path = require_str(params, "path")?;
    let project = ctx.storage.find_project_by_repo_path(path)?;
    let mut result = Map::new();
    result.insert("project".to_string(), serde_json::to_value(project).unwrap_or(Value::Null));
    Ok(result)
}

async fn repo_details(ctx: &DispatchContext, params: &Map<String, Value>) -> HandlerResult {
    let repo_id = require_str(params, "repo_id")?;
    let repo = ctx.storage.get_repo(repo_id)?;
    let mut result = Map::new();
    result.insert("repo".to_string(), serde_json::to_value(repo).unwrap_or(Value::Null));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests_support::context;

    #[tokio::test]
    async fn add_repo_is_idempotent_by_path() {
        let ctx = context();
        let project = ctx.storage.create_project("P", None).unwrap();
        let mut params = Map::new();
        params.insert("project_id".to_string(), Value::String(project.id.clone()));
        params.insert("path".to_string(), Value::String("/tmp/r".to_string()));
        params.insert("name".to_string(), Value::String("r".to_string()));

        let first = add_repo(&ctx, &params).await.unwrap();
        let second = add_repo(&ctx, &params).await.unwrap();
        assert_eq!(first["repo"]["id"], second["repo"]["id"]);
        assert_eq!(ctx.storage.repos_for_project(&project.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_repo_path_returns_null_when_unlinked() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("path".to_string(), Value::String("/nowhere".to_string()));
        let result = find_by_repo_path(&ctx, &params).await.unwrap();
        assert!(result["project"].is_null());
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let ctx = context();
        let mut params = Map::new();
        params.insert("project_id".to_string(), Value::String("nope".to_string()));
        let err = get(&ctx, &params).await.unwrap_err();
        assert_eq!(err.error_code().as_str(), "NOT_FOUND");
    }
}
