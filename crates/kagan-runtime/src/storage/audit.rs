use super::{Storage, StorageResult, now_rfc3339};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub capability: String,
    pub method: String,
    pub summary: String,
}

impl Storage {
    pub fn record_audit(&self, actor: &str, capability: &str, method: &str, summary: &str) -> StorageResult<()> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (id, occurred_at, actor, capability, method, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, now, actor, capability, method, summary],
        )?;
        Ok(())
    }

    pub fn list_audit(&self, limit: u32) -> StorageResult<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, occurred_at, actor, capability, method, summary
             FROM audit_log ORDER BY occurred_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    occurred_at: row.get::<_, String>(1)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
                    actor: row.get(2)?,
                    capability: row.get(3)?,
                    method: row.get(4)?,
                    summary: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
