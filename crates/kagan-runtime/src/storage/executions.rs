use super::{Storage, StorageError, StorageResult, now_rfc3339};
use kagan_common::{CodingAgentTurn, ExecutionProcess, ExecutionStatus, RunReason};
use rusqlite::{Row, params};

fn row_to_execution(row: &Row) -> rusqlite::Result<ExecutionProcess> {
    let run_reason: String = row.get(2)?;
    let executor_action: String = row.get(3)?;
    let status: String = row.get(4)?;
    let metadata: String = row.get(7)?;
    Ok(ExecutionProcess {
        id: row.get(0)?,
        session_id: row.get(1)?,
        run_reason: RunReason::from_str(&run_reason).unwrap_or(RunReason::CodingAgent),
        executor_action: serde_json::from_str(&executor_action).unwrap_or(serde_json::Value::Null),
        status: ExecutionStatus::from_str(&status).unwrap_or(ExecutionStatus::Running),
        exit_code: row.get(5)?,
        dropped: row.get::<_, i64>(6)? != 0,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get::<_, String>(8)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: row.get::<_, String>(9)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

const SELECT_EXECUTION: &str = "SELECT id, session_id, run_reason, executor_action, status, exit_code, \
    dropped, metadata, created_at, updated_at FROM execution_processes";

impl Storage {
    pub fn create_execution(
        &self,
        session_id: &str,
        run_reason: RunReason,
        executor_action: &serde_json::Value,
    ) -> StorageResult<ExecutionProcess> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let action_json = serde_json::to_string(executor_action)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_processes (id, session_id, run_reason, executor_action, status,
                exit_code, dropped, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 0, '{}', ?6, ?6)",
            params![id, session_id, run_reason.as_str(), action_json, ExecutionStatus::Running.as_str(), now],
        )?;
        conn.execute(
            "INSERT INTO execution_process_logs (execution_id, content) VALUES (?1, '')",
            params![id],
        )?;
        drop(conn);
        self.get_execution(&id)
    }

    pub fn get_execution(&self, id: &str) -> StorageResult<ExecutionProcess> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(&format!("{SELECT_EXECUTION} WHERE id = ?1"), params![id], row_to_execution)
            .map_err(|_| StorageError::NotFound {
                entity: "execution",
                id: id.to_string(),
            })
    }

    pub fn finish_execution(&self, id: &str, status: ExecutionStatus, exit_code: Option<i32>, dropped: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE execution_processes SET status = ?2, exit_code = ?3, dropped = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, status.as_str(), exit_code, dropped as i64, now],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "execution",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Every call appends exactly once; readers never observe torn writes
    /// because the whole blob is written back under the connection lock.
    pub fn append_execution_log(&self, execution_id: &str, event_json: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE execution_process_logs SET content = content || ?2 || char(10) WHERE execution_id = ?1",
            params![execution_id, event_json],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "execution_log",
                id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn read_execution_log(&self, execution_id: &str) -> StorageResult<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT content FROM execution_process_logs WHERE execution_id = ?1",
            params![execution_id],
            |row| row.get(0),
        )
        .map_err(|_| StorageError::NotFound {
            entity: "execution_log",
            id: execution_id.to_string(),
        })
    }

    pub fn persist_turn(
        &self,
        execution_id: &str,
        prompt: &str,
        summary: &str,
        agent_session_id: Option<&str>,
    ) -> StorageResult<CodingAgentTurn> {
        let id = kagan_common::new_id();
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO coding_agent_turns (id, execution_id, prompt, summary, agent_session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, execution_id, prompt, summary, agent_session_id, now],
        )?;
        Ok(CodingAgentTurn {
            id,
            execution_id: execution_id.to_string(),
            prompt: prompt.to_string(),
            summary: summary.to_string(),
            agent_session_id: agent_session_id.map(str::to_string),
            created_at: now.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    pub fn turns_for_execution(&self, execution_id: &str) -> StorageResult<Vec<CodingAgentTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, prompt, summary, agent_session_id, created_at
             FROM coding_agent_turns WHERE execution_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![execution_id], |row| {
                Ok(CodingAgentTurn {
                    id: row.get(0)?,
                    execution_id: row.get(1)?,
                    prompt: row.get(2)?,
                    summary: row.get(3)?,
                    agent_session_id: row.get(4)?,
                    created_at: row.get::<_, String>(5)?.parse().unwrap_or_else(|_| chrono::Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Runtime-registry reconciliation (spec §4.9): any execution still
    /// `RUNNING` at startup belongs to a supervisor that died with the
    /// process and is marked completed with `dropped=true`.
    pub fn mark_orphaned_executions_dropped(&self) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let mut stmt = conn.prepare("SELECT id FROM execution_processes WHERE status = 'running'")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for id in &ids {
            conn.execute(
                "UPDATE execution_processes SET status = ?2, dropped = 1, updated_at = ?3 WHERE id = ?1",
                params![id, ExecutionStatus::Completed.as_str(), now],
            )?;
        }
        Ok(ids)
    }
}
