use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::{Session, SessionStatus, SessionType, TaskType};
use rusqlite::{Row, params};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let session_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        session_type: SessionType::from_str(&session_type).unwrap_or(SessionType::Acp),
        status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Active),
        external_id: row.get(4)?,
        started_at: row.get::<_, String>(5)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        ended_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| s.parse().unwrap_or_else(|_| chrono::Utc::now())),
    })
}

const SELECT_SESSION: &str =
    "SELECT id, workspace_id, session_type, status, external_id, started_at, ended_at FROM sessions";

impl Storage {
    /// Spec §4.8: creating a Session for a PAIR task fails with
    /// `TASK_TYPE_MISMATCH` unless the owning task is PAIR-typed.
    pub fn create_session(
        &self,
        workspace_id: &str,
        session_type: SessionType,
        external_id: Option<&str>,
    ) -> StorageResult<Session> {
        if session_type == SessionType::TerminalAttach {
            let workspace = self.get_workspace(workspace_id)?;
            if let Some(task_id) = workspace.task_id {
                let task = self.get_task(&task_id)?;
                if task.task_type != TaskType::Pair {
                    return Err(StorageError::TaskTypeMismatch { task_id });
                }
            }
        }
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, workspace_id, session_type, status, external_id, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
            params![id, workspace_id, session_type.as_str(), SessionStatus::Active.as_str(), external_id, now],
        )?;
        drop(conn);
        self.get_session(&id)
    }

    pub fn get_session(&self, id: &str) -> StorageResult<Session> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_SESSION} WHERE id = ?1"), params![id], row_to_session)
            .map_err(|_| StorageError::NotFound {
                entity: "session",
                id: id.to_string(),
            })
    }

    pub fn session_exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.get_session(id).is_ok())
    }

    pub fn close_session(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE sessions SET status = ?2, ended_at = ?3 WHERE id = ?1",
            params![id, SessionStatus::Closed.as_str(), now],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "session",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tasks::NewTask;
    use kagan_common::{Priority, TaskType};

    #[test]
    fn session_for_auto_task_workspace_does_not_require_pair_type() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.create_project("P", None).unwrap();
        let task = storage
            .create_task(NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        let workspace = storage
            .create_workspace(&project.id, Some(&task.id), "kagan/t1", "/tmp/w")
            .unwrap();
        let session = storage
            .create_session(&workspace.id, SessionType::Acp, None)
            .unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn terminal_attach_session_for_auto_task_fails_type_mismatch() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.create_project("P", None).unwrap();
        let task = storage
            .create_task(NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        let workspace = storage
            .create_workspace(&project.id, Some(&task.id), "kagan/t1", "/tmp/w")
            .unwrap();
        let err = storage
            .create_session(&workspace.id, SessionType::TerminalAttach, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::TaskTypeMismatch { .. }));
    }
}
