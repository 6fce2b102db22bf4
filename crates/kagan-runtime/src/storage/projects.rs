use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::Project;
use rusqlite::{OptionalExtension, Row, params};

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?,
        last_opened_at: row
            .get::<_, Option<String>>(3)?
            .map(|s| s.parse().unwrap_or_else(|_| chrono::Utc::now())),
        created_at: row.get::<_, String>(4)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: row.get::<_, String>(5)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

const SELECT_PROJECT: &str =
    "SELECT id, name, description, last_opened_at, created_at, updated_at FROM projects";

impl Storage {
    pub fn create_project(&self, name: &str, description: Option<&str>) -> StorageResult<Project> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO projects (id, name, description, last_opened_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
            params![id, name, description, now],
        )?;
        drop(conn);
        self.get_project(&id)
    }

    pub fn get_project(&self, id: &str) -> StorageResult<Project> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_PROJECT} WHERE id = ?1"),
            params![id],
            row_to_project,
        )
        .map_err(|_| StorageError::NotFound {
            entity: "project",
            id: id.to_string(),
        })
    }

    pub fn list_projects(&self) -> StorageResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{SELECT_PROJECT} ORDER BY name"))?;
        let rows = stmt
            .query_map([], row_to_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_project_opened(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE projects SET last_opened_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "project",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn add_repo_to_project(
        &self,
        project_id: &str,
        repo_id: &str,
        is_primary: bool,
        display_order: i64,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO project_repos (project_id, repo_id, is_primary, display_order)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, repo_id) DO UPDATE SET is_primary = excluded.is_primary, display_order = excluded.display_order",
            params![project_id, repo_id, is_primary as i64, display_order],
        )?;
        Ok(())
    }

    pub fn repos_for_project(&self, project_id: &str) -> StorageResult<Vec<kagan_common::Repo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.name, r.path, r.default_branch, r.display_name, r.default_working_dir, r.scripts
             FROM repos r JOIN project_repos pr ON pr.repo_id = r.id
             WHERE pr.project_id = ?1 ORDER BY pr.display_order",
        )?;
        let rows = stmt
            .query_map(params![project_id], super::repos::row_to_repo)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn find_project_by_repo_path(&self, path: &str) -> StorageResult<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "{SELECT_PROJECT} WHERE id = (
                    SELECT pr.project_id FROM project_repos pr
                    JOIN repos r ON r.id = pr.repo_id
                    WHERE r.path = ?1 LIMIT 1
                )"
            ),
            params![path],
            row_to_project,
        )
        .optional()
        .map_err(StorageError::from)
    }
}
