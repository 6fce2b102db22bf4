//! Queued Message Service (spec §4.15): a FIFO of follow-up user messages
//! per `(session_id, lane)`, merged into a single payload the next time the
//! orchestrator feeds a running agent.

use kagan_common::{Lane, QueuedMessage};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_PREVIEW_CHARS: usize = 120;

fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let mut preview: String = content.chars().take(max_chars).collect();
        preview.push('\u{2026}');
        preview
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub count: usize,
    pub latest_preview: Option<String>,
    pub latest_queued_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Default)]
pub struct QueuedMessageService {
    lanes: Mutex<HashMap<(String, Lane), Vec<QueuedMessage>>>,
    preview_chars: usize,
}

impl QueuedMessageService {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn with_preview_chars(preview_chars: usize) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            preview_chars,
        }
    }

    pub fn queue_message(&self, session_id: &str, lane: Lane, content: String, author: Option<String>, metadata: serde_json::Value) {
        let message = QueuedMessage {
            content,
            author,
            metadata,
            queued_at: chrono::Utc::now(),
        };
        let mut lanes = self.lanes.lock().unwrap();
        lanes.entry((session_id.to_string(), lane)).or_default().push(message);
    }

    pub fn cancel_queued(&self, session_id: &str, lane: Lane) {
        let mut lanes = self.lanes.lock().unwrap();
        lanes.remove(&(session_id.to_string(), lane));
    }

    pub fn get_status(&self, session_id: &str, lane: Lane) -> QueueStatus {
        let lanes = self.lanes.lock().unwrap();
        match lanes.get(&(session_id.to_string(), lane)) {
            Some(messages) if !messages.is_empty() => {
                let latest = messages.last().unwrap();
                QueueStatus {
                    count: messages.len(),
                    latest_preview: Some(truncate_preview(&latest.content, self.preview_chars)),
                    latest_queued_at: Some(latest.queued_at),
                }
            }
            _ => QueueStatus {
                count: 0,
                latest_preview: None,
                latest_queued_at: None,
            },
        }
    }

    /// Pops every pending message in the lane and merges them into a
    /// single newline-joined payload for the next agent turn; `None` if
    /// the lane was empty.
    pub fn take_queued(&self, session_id: &str, lane: Lane) -> Option<String> {
        let mut lanes = self.lanes.lock().unwrap();
        let messages = lanes.remove(&(session_id.to_string(), lane))?;
        if messages.is_empty() {
            return None;
        }
        Some(messages.into_iter().map(|m| m.content).collect::<Vec<_>>().join("\n"))
    }

    pub fn take_all_queued(&self, session_id: &str) -> HashMap<Lane, String> {
        let mut lanes = self.lanes.lock().unwrap();
        let keys: Vec<(String, Lane)> = lanes
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .cloned()
            .collect();
        let mut merged = HashMap::new();
        for key in keys {
            if let Some(messages) = lanes.remove(&key) {
                if !messages.is_empty() {
                    merged.insert(key.1, messages.into_iter().map(|m| m.content).collect::<Vec<_>>().join("\n"));
                }
            }
        }
        merged
    }

    pub fn get_queued(&self, session_id: &str, lane: Lane) -> Vec<QueuedMessage> {
        let lanes = self.lanes.lock().unwrap();
        lanes.get(&(session_id.to_string(), lane)).cloned().unwrap_or_default()
    }

    pub fn remove_message(&self, session_id: &str, lane: Lane, index: usize) -> bool {
        let mut lanes = self.lanes.lock().unwrap();
        match lanes.get_mut(&(session_id.to_string(), lane)) {
            Some(messages) if index < messages.len() => {
                messages.remove(index);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_queued_merges_in_fifo_order() {
        let service = QueuedMessageService::new();
        service.queue_message("s1", Lane::Implementation, "first".into(), None, serde_json::Value::Null);
        service.queue_message("s1", Lane::Implementation, "second".into(), None, serde_json::Value::Null);
        let merged = service.take_queued("s1", Lane::Implementation).unwrap();
        assert_eq!(merged, "first\nsecond");
        assert!(service.take_queued("s1", Lane::Implementation).is_none());
    }

    #[test]
    fn preview_truncates_with_ellipsis() {
        let service = QueuedMessageService::with_preview_chars(5);
        service.queue_message("s1", Lane::Review, "hello world".into(), None, serde_json::Value::Null);
        let status = service.get_status("s1", Lane::Review);
        assert_eq!(status.latest_preview.unwrap(), "hello\u{2026}");
        assert_eq!(status.count, 1);
    }

    #[test]
    fn lanes_are_independent_per_session() {
        let service = QueuedMessageService::new();
        service.queue_message("s1", Lane::Planner, "a".into(), None, serde_json::Value::Null);
        service.queue_message("s2", Lane::Planner, "b".into(), None, serde_json::Value::Null);
        assert_eq!(service.get_queued("s1", Lane::Planner).len(), 1);
        assert_eq!(service.get_queued("s2", Lane::Planner).len(), 1);
    }

    #[test]
    fn remove_message_by_index() {
        let service = QueuedMessageService::new();
        service.queue_message("s1", Lane::Implementation, "a".into(), None, serde_json::Value::Null);
        service.queue_message("s1", Lane::Implementation, "b".into(), None, serde_json::Value::Null);
        assert!(service.remove_message("s1", Lane::Implementation, 0));
        let remaining = service.get_queued("s1", Lane::Implementation);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "b");
    }
}
