use super::{Storage, StorageResult};
use rusqlite::{OptionalExtension, params};
use serde_json::Value;

/// Orchestrator knobs backed by the `settings` table (SPEC_FULL.md §4.0b).
/// Values round-trip as JSON; defaults here are applied when a key is unset.
pub fn default_value(key: &str) -> Option<Value> {
    match key {
        "auto_start" => Some(Value::Bool(false)),
        "max_concurrent_agents" => Some(Value::from(2)),
        "max_iterations" => Some(Value::from(5)),
        "auto_review" => Some(Value::Bool(false)),
        "auto_approve" => Some(Value::Bool(false)),
        "iteration_delay_seconds" => Some(Value::from(5)),
        "serialize_merges" => Some(Value::Bool(true)),
        "worktree_base_strategy" => Some(Value::String("remote".to_string())),
        "hats" => Some(Value::Object(Default::default())),
        _ => None,
    }
}

impl Storage {
    pub fn get_setting(&self, key: &str) -> StorageResult<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(default_value(key)),
        }
    }

    pub fn update_setting(&self, key: &str, value: &Value) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, json],
        )?;
        Ok(())
    }

    pub fn list_settings(&self) -> StorageResult<Vec<(String, Value)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt
            .query_map([], |row| {
                let key: String = row.get(0)?;
                let raw: String = row.get(1)?;
                Ok((key, raw))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(k, raw)| Ok((k, serde_json::from_str(&raw)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_setting_falls_back_to_default() {
        let storage = Storage::open_in_memory().unwrap();
        let value = storage.get_setting("max_concurrent_agents").unwrap().unwrap();
        assert_eq!(value, Value::from(2));
    }

    #[test]
    fn update_setting_overrides_default() {
        let storage = Storage::open_in_memory().unwrap();
        storage.update_setting("max_concurrent_agents", &Value::from(8)).unwrap();
        let value = storage.get_setting("max_concurrent_agents").unwrap().unwrap();
        assert_eq!(value, Value::from(8));
    }
}
