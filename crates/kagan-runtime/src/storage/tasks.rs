use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::{Priority, Task, TaskStatus, TaskType};
use rusqlite::{OptionalExtension, Row, params};

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let task_type: String = row.get(6)?;
    let criteria_json: String = row.get(10)?;
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Backlog),
        priority: match priority.as_str() {
            "LOW" => Priority::Low,
            "HIGH" => Priority::High,
            _ => Priority::Medium,
        },
        task_type: if task_type == "AUTO" {
            TaskType::Auto
        } else {
            TaskType::Pair
        },
        assigned_hat: row.get(7)?,
        agent_backend: row.get(8)?,
        base_branch: row.get(9)?,
        acceptance_criteria: serde_json::from_str(&criteria_json).unwrap_or_default(),
        created_at: row.get::<_, String>(11)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: row.get::<_, String>(12)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

const SELECT_TASK: &str = "SELECT id, project_id, title, description, status, priority, task_type, \
    assigned_hat, agent_backend, base_branch, acceptance_criteria, created_at, updated_at FROM tasks";

pub struct NewTask<'a> {
    pub project_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub priority: Priority,
    pub task_type: TaskType,
    pub assigned_hat: Option<&'a str>,
    pub agent_backend: Option<&'a str>,
    pub base_branch: Option<&'a str>,
    pub acceptance_criteria: Vec<String>,
}

/// Fields that changed in an `update`, for the `TaskUpdated{changed_fields}` event.
pub struct TaskUpdate<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub priority: Option<Priority>,
    pub assigned_hat: Option<&'a str>,
    pub agent_backend: Option<&'a str>,
    pub base_branch: Option<&'a str>,
    pub acceptance_criteria: Option<Vec<String>>,
}

impl Storage {
    pub fn create_task(&self, new_task: NewTask<'_>) -> StorageResult<Task> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let criteria_json = serde_json::to_string(&new_task.acceptance_criteria)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, project_id, title, description, status, priority, task_type,
                assigned_hat, agent_backend, base_branch, acceptance_criteria, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                id,
                new_task.project_id,
                new_task.title,
                new_task.description,
                kagan_common::TaskStatus::Backlog.as_str(),
                new_task.priority.as_str(),
                new_task.task_type.as_str(),
                new_task.assigned_hat,
                new_task.agent_backend,
                new_task.base_branch,
                criteria_json,
                now,
            ],
        )?;
        drop(conn);
        self.get_task(&id)
    }

    pub fn get_task(&self, id: &str) -> StorageResult<Task> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_TASK} WHERE id = ?1"), params![id], row_to_task)
            .map_err(|_| StorageError::NotFound {
                entity: "task",
                id: id.to_string(),
            })
    }

    pub fn list_tasks(&self, project_id: Option<&str>) -> StorageResult<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let tasks = match project_id {
            Some(pid) => {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_TASK} WHERE project_id = ?1 ORDER BY created_at"))?;
                stmt.query_map(params![pid], row_to_task)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!("{SELECT_TASK} ORDER BY created_at"))?;
                stmt.query_map([], row_to_task)?.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(tasks)
    }

    pub fn search_tasks(&self, query: &str) -> StorageResult<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", query.replace('%', "\\%"));
        let mut stmt =
            conn.prepare(&format!("{SELECT_TASK} WHERE title LIKE ?1 OR description LIKE ?1 ORDER BY created_at"))?;
        let rows = stmt
            .query_map(params![pattern], row_to_task)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Returns the list of field names that actually changed, for the caller to
    /// build a `TaskUpdated{changed_fields}` event.
    pub fn update_task(&self, id: &str, update: TaskUpdate<'_>) -> StorageResult<(Task, Vec<&'static str>)> {
        let existing = self.get_task(id)?;
        let mut changed = Vec::new();

        let title = update.title.unwrap_or(&existing.title);
        if update.title.is_some_and(|t| t != existing.title) {
            changed.push("title");
        }
        let description = update.description.unwrap_or(&existing.description);
        if update.description.is_some_and(|d| d != existing.description) {
            changed.push("description");
        }
        let priority = update.priority.unwrap_or(existing.priority);
        if update.priority.is_some_and(|p| p != existing.priority) {
            changed.push("priority");
        }
        let assigned_hat = update.assigned_hat.or(existing.assigned_hat.as_deref());
        if update.assigned_hat.is_some() && update.assigned_hat != existing.assigned_hat.as_deref() {
            changed.push("assigned_hat");
        }
        let agent_backend = update.agent_backend.or(existing.agent_backend.as_deref());
        if update.agent_backend.is_some() && update.agent_backend != existing.agent_backend.as_deref() {
            changed.push("agent_backend");
        }
        let base_branch = update.base_branch.or(existing.base_branch.as_deref());
        if update.base_branch.is_some() && update.base_branch != existing.base_branch.as_deref() {
            changed.push("base_branch");
        }
        let acceptance_criteria = update.acceptance_criteria.clone().unwrap_or_else(|| existing.acceptance_criteria.clone());
        if update.acceptance_criteria.is_some() && Some(&acceptance_criteria) != Some(&existing.acceptance_criteria) {
            changed.push("acceptance_criteria");
        }

        if changed.is_empty() {
            return Ok((existing, changed));
        }

        let criteria_json = serde_json::to_string(&acceptance_criteria)?;
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, priority = ?4, assigned_hat = ?5,
                agent_backend = ?6, base_branch = ?7, acceptance_criteria = ?8, updated_at = ?9
             WHERE id = ?1",
            params![id, title, description, priority.as_str(), assigned_hat, agent_backend, base_branch, criteria_json, now],
        )?;
        drop(conn);
        Ok((self.get_task(id)?, changed))
    }

    /// Moves a task's status, validating the transition. Returns the task
    /// after the move; the caller emits `TaskStatusChanged{from, to, reason}`.
    pub fn move_task(&self, id: &str, to: TaskStatus, reason: Option<&str>) -> StorageResult<(Task, TaskStatus)> {
        let existing = self.get_task(id)?;
        let from = existing.status;
        if !from.allows_transition(to) {
            return Err(StorageError::InvalidTransition {
                task_id: id.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, to.as_str(), now],
        )?;
        drop(conn);
        let _ = reason;
        Ok((self.get_task(id)?, from))
    }

    pub fn delete_task(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn find_task(&self, id: &str) -> StorageResult<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_TASK} WHERE id = ?1"), params![id], row_to_task)
            .optional()
            .map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_project() -> (Storage, String) {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.create_project("P", None).unwrap();
        (storage, project.id)
    }

    #[test]
    fn create_task_defaults_to_backlog() {
        let (storage, project_id) = storage_with_project();
        let task = storage
            .create_task(NewTask {
                project_id: &project_id,
                title: "Rename foo to bar",
                description: "",
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
    }

    #[test]
    fn move_task_rejects_illegal_transition() {
        let (storage, project_id) = storage_with_project();
        let task = storage
            .create_task(NewTask {
                project_id: &project_id,
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
        let err = storage.move_task(&task.id, TaskStatus::Done, None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
    }

    #[test]
    fn move_task_allows_canonical_transition() {
        let (storage, project_id) = storage_with_project();
        let task = storage
            .create_task(NewTask {
                project_id: &project_id,
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
        let (moved, from) = storage
            .move_task(&task.id, TaskStatus::InProgress, None)
            .unwrap();
        assert_eq!(from, TaskStatus::Backlog);
        assert_eq!(moved.status, TaskStatus::InProgress);
    }

    #[test]
    fn update_task_reports_changed_fields_only() {
        let (storage, project_id) = storage_with_project();
        let task = storage
            .create_task(NewTask {
                project_id: &project_id,
                title: "T",
                description: "d",
                priority: Priority::Medium,
                task_type: TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        let (_, changed) = storage
            .update_task(
                &task.id,
                TaskUpdate {
                    title: Some("New title"),
                    description: None,
                    priority: None,
                    assigned_hat: None,
                    agent_backend: None,
                    base_branch: None,
                    acceptance_criteria: None,
                },
            )
            .unwrap();
        assert_eq!(changed, vec!["title"]);
    }
}
