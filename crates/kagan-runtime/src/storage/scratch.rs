use super::{Storage, StorageResult, now_rfc3339};
use kagan_common::Scratch;
use rusqlite::params;

impl Storage {
    /// Upsert, last-write-wins keyed by task_id (spec §4.8).
    pub fn upsert_scratch(&self, task_id: &str, content: &str) -> StorageResult<Scratch> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scratches (task_id, content, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
            params![task_id, content, now],
        )?;
        Ok(Scratch {
            task_id: task_id.to_string(),
            content: content.to_string(),
            updated_at: now.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    pub fn get_scratch(&self, task_id: &str) -> StorageResult<String> {
        let conn = self.conn.lock().unwrap();
        let content = conn
            .query_row(
                "SELECT content FROM scratches WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .unwrap_or_default();
        Ok(content)
    }

    pub fn append_scratch(&self, task_id: &str, section: &str) -> StorageResult<Scratch> {
        let existing = self.get_scratch(task_id)?;
        let combined = if existing.is_empty() {
            section.to_string()
        } else {
            format!("{existing}\n\n{section}")
        };
        self.upsert_scratch(task_id, &combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_scratch_accumulates_sections() {
        let storage = Storage::open_in_memory().unwrap();
        let project = storage.create_project("P", None).unwrap();
        let task = storage
            .create_task(crate::storage::NewTask {
                project_id: &project.id,
                title: "T",
                description: "",
                priority: kagan_common::Priority::Medium,
                task_type: kagan_common::TaskType::Auto,
                assigned_hat: None,
                agent_backend: None,
                base_branch: None,
                acceptance_criteria: vec![],
            })
            .unwrap();
        storage.append_scratch(&task.id, "## Iteration 1\noutput").unwrap();
        storage.append_scratch(&task.id, "## Iteration 2\nmore").unwrap();
        let content = storage.get_scratch(&task.id).unwrap();
        assert!(content.contains("Iteration 1"));
        assert!(content.contains("Iteration 2"));
    }
}
