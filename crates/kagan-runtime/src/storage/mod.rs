//! Storage & entity model (spec component #8).
//!
//! A single SQLite connection wrapped in a `Mutex` — `rusqlite::Connection`
//! is `!Sync`, and every write already goes through the domain event bus
//! after commit, so contention here is not the bottleneck the orchestrator
//! or ACP supervisor would be.

mod audit;
mod executions;
mod merges;
mod projects;
mod repos;
mod schema;
mod scratch;
mod sessions;
mod settings;
mod tasks;
mod workspaces;

pub use audit::AuditEntry;
pub use tasks::{NewTask, TaskUpdate};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("session type mismatch: task {task_id} is not a PAIR task")]
    TaskTypeMismatch { task_id: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self::from_connection(conn)?;
        Ok(storage)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(schema::MIGRATIONS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_runs_migrations_idempotently() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn.lock().unwrap();
        conn.execute_batch(schema::MIGRATIONS).unwrap();
    }
}
