use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::{Workspace, WorkspaceStatus};
use rusqlite::{OptionalExtension, Row, params};

fn row_to_workspace(row: &Row) -> rusqlite::Result<Workspace> {
    let status: String = row.get(5)?;
    Ok(Workspace {
        id: row.get(0)?,
        project_id: row.get(1)?,
        task_id: row.get(2)?,
        branch_name: row.get(3)?,
        path: row.get(4)?,
        status: WorkspaceStatus::from_str(&status).unwrap_or(WorkspaceStatus::Active),
        created_at: row.get::<_, String>(6)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: row.get::<_, String>(7)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

const SELECT_WORKSPACE: &str =
    "SELECT id, project_id, task_id, branch_name, path, status, created_at, updated_at FROM workspaces";

impl Storage {
    /// Invariant: at most one ACTIVE workspace per task. Callers resolve an
    /// existing active workspace before calling this.
    pub fn create_workspace(
        &self,
        project_id: &str,
        task_id: Option<&str>,
        branch_name: &str,
        path: &str,
    ) -> StorageResult<Workspace> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workspaces (id, project_id, task_id, branch_name, path, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![id, project_id, task_id, branch_name, path, WorkspaceStatus::Active.as_str(), now],
        )?;
        drop(conn);
        self.get_workspace(&id)
    }

    pub fn get_workspace(&self, id: &str) -> StorageResult<Workspace> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_WORKSPACE} WHERE id = ?1"), params![id], row_to_workspace)
            .map_err(|_| StorageError::NotFound {
                entity: "workspace",
                id: id.to_string(),
            })
    }

    pub fn active_workspace_for_task(&self, task_id: &str) -> StorageResult<Option<Workspace>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_WORKSPACE} WHERE task_id = ?1 AND status = 'active' LIMIT 1"),
            params![task_id],
            row_to_workspace,
        )
        .optional()
        .map_err(StorageError::from)
    }

    pub fn archive_workspace(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE workspaces SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, WorkspaceStatus::Archived.as_str(), now],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "workspace",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn add_workspace_repo(
        &self,
        workspace_id: &str,
        repo_id: &str,
        target_branch: &str,
        worktree_path: &str,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workspace_repos (workspace_id, repo_id, target_branch, worktree_path)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workspace_id, repo_id) DO UPDATE SET target_branch = excluded.target_branch, worktree_path = excluded.worktree_path",
            params![workspace_id, repo_id, target_branch, worktree_path],
        )?;
        Ok(())
    }

    pub fn workspace_repos(&self, workspace_id: &str) -> StorageResult<Vec<kagan_common::WorkspaceRepo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT workspace_id, repo_id, target_branch, worktree_path FROM workspace_repos WHERE workspace_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![workspace_id], |row| {
                Ok(kagan_common::WorkspaceRepo {
                    workspace_id: row.get(0)?,
                    repo_id: row.get(1)?,
                    target_branch: row.get(2)?,
                    worktree_path: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
