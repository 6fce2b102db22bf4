use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::{Merge, MergeType, PrStatus};
use rusqlite::{Row, params};

fn row_to_merge(row: &Row) -> rusqlite::Result<Merge> {
    let merge_type: String = row.get(3)?;
    let pr_status: Option<String> = row.get(8)?;
    Ok(Merge {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        repo_id: row.get(2)?,
        merge_type: MergeType::from_str(&merge_type).unwrap_or(MergeType::Direct),
        target_branch: row.get(4)?,
        merge_commit: row.get(5)?,
        pr_url: row.get(6)?,
        pr_number: row.get(7)?,
        pr_status: pr_status.and_then(|s| PrStatus::from_str(&s).ok()),
        created_at: row.get::<_, String>(9)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: row.get::<_, String>(10)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

const SELECT_MERGE: &str = "SELECT id, workspace_id, repo_id, merge_type, target_branch, merge_commit, \
    pr_url, pr_number, pr_status, created_at, updated_at FROM merges";

impl Storage {
    pub fn create_merge(
        &self,
        workspace_id: &str,
        repo_id: &str,
        merge_type: MergeType,
        target_branch: &str,
    ) -> StorageResult<Merge> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO merges (id, workspace_id, repo_id, merge_type, target_branch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, workspace_id, repo_id, merge_type.as_str(), target_branch, now],
        )?;
        drop(conn);
        self.get_merge(&id)
    }

    pub fn get_merge(&self, id: &str) -> StorageResult<Merge> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_MERGE} WHERE id = ?1"), params![id], row_to_merge)
            .map_err(|_| StorageError::NotFound {
                entity: "merge",
                id: id.to_string(),
            })
    }

    pub fn record_merge_commit(&self, id: &str, merge_commit: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        conn.execute(
            "UPDATE merges SET merge_commit = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, merge_commit, now],
        )?;
        Ok(())
    }

    pub fn record_pr(&self, id: &str, pr_url: &str, pr_number: i64, pr_status: PrStatus) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        conn.execute(
            "UPDATE merges SET pr_url = ?2, pr_number = ?3, pr_status = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, pr_url, pr_number, pr_status.as_str(), now],
        )?;
        Ok(())
    }
}
