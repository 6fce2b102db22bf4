use super::{Storage, StorageError, StorageResult};
use kagan_common::Repo;
use rusqlite::{Row, params};
use std::collections::HashMap;

pub(super) fn row_to_repo(row: &Row) -> rusqlite::Result<Repo> {
    let scripts_json: String = row.get(6)?;
    let scripts: HashMap<String, String> = serde_json::from_str(&scripts_json).unwrap_or_default();
    Ok(Repo {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        default_branch: row.get(3)?,
        display_name: row.get(4)?,
        default_working_dir: row.get(5)?,
        scripts,
    })
}

const SELECT_REPO: &str =
    "SELECT id, name, path, default_branch, display_name, default_working_dir, scripts FROM repos";

impl Storage {
    pub fn create_repo(
        &self,
        name: &str,
        path: &str,
        default_branch: &str,
        display_name: Option<&str>,
        default_working_dir: Option<&str>,
    ) -> StorageResult<Repo> {
        let id = kagan_common::new_id();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO repos (id, name, path, default_branch, display_name, default_working_dir, scripts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}')",
            params![id, name, path, default_branch, display_name, default_working_dir],
        )?;
        drop(conn);
        self.get_repo(&id)
    }

    pub fn get_repo(&self, id: &str) -> StorageResult<Repo> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_REPO} WHERE id = ?1"), params![id], row_to_repo)
            .map_err(|_| StorageError::NotFound {
                entity: "repo",
                id: id.to_string(),
            })
    }

    pub fn find_repo_by_path(&self, path: &str) -> StorageResult<Option<Repo>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_REPO} WHERE path = ?1"), params![path], row_to_repo)
            .optional()
            .map_err(StorageError::from)
    }

    pub fn update_repo_scripts(
        &self,
        id: &str,
        scripts: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let json = serde_json::to_string(scripts)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE repos SET scripts = ?2 WHERE id = ?1",
            params![id, json],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "repo",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_repo_round_trips_scripts() {
        let storage = Storage::open_in_memory().unwrap();
        let repo = storage
            .create_repo("r", "/tmp/r", "main", None, None)
            .unwrap();
        let mut scripts = HashMap::new();
        scripts.insert("build".to_string(), "cargo build".to_string());
        storage.update_repo_scripts(&repo.id, &scripts).unwrap();
        let fetched = storage.get_repo(&repo.id).unwrap();
        assert_eq!(fetched.scripts.get("build").unwrap(), "cargo build");
    }
}
