//! Agent Client Protocol message shapes (spec §4.12), rewritten as a tagged
//! union per spec.md §9 ("Inheritance-based message hierarchy... rewrite as
//! a tagged union dispatched by pattern match") in place of the teacher's
//! `StreamEvent`/`ContentBlock` tagged enums in `stream/mod.rs`, which this
//! generalizes from Claude CLI's stream-json shape to ACP's JSON-RPC
//! notification/request shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOption {
    pub option_id: String,
    pub kind: PermissionKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub tool_call_id: String,
    pub title: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Agent -> host events, dispatched by pattern match instead of a base
/// class hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    AgentReady,
    AgentFail { message: String, details: Option<String> },
    AgentUpdate { content_type: String, text: String },
    Thinking { text: String },
    ToolCall { tool_call: ToolCallInfo },
    ToolCallUpdate { tool_call_id: String, status: String },
    Plan { entries: Vec<String> },
}

/// A permission request carries a completion channel rather than being
/// serialized itself; the `reply` half is consumed exactly once by
/// whichever of (auto-approve policy, forwarded client answer, timeout)
/// resolves first.
#[derive(Debug)]
pub struct RequestPermission {
    pub options: Vec<PermissionOption>,
    pub tool_call: ToolCallInfo,
    pub reply: oneshot::Sender<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub option_id: String,
}

/// Inbound JSON-RPC request method names the agent may invoke on us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMethod {
    FsReadTextFile,
    FsWriteTextFile,
    TerminalCreate,
    TerminalOutput,
    TerminalWrite,
    TerminalKill,
    TerminalRelease,
    TerminalWaitForExit,
    SessionRequestPermission,
    Unknown,
}

impl HostMethod {
    pub fn from_str(method: &str) -> Self {
        match method {
            "fs/read_text_file" => Self::FsReadTextFile,
            "fs/write_text_file" => Self::FsWriteTextFile,
            "terminal/create" => Self::TerminalCreate,
            "terminal/output" => Self::TerminalOutput,
            "terminal/write" => Self::TerminalWrite,
            "terminal/kill" => Self::TerminalKill,
            "terminal/release" => Self::TerminalRelease,
            "terminal/wait_for_exit" => Self::TerminalWaitForExit,
            "session/request_permission" => Self::SessionRequestPermission,
            _ => Self::Unknown,
        }
    }

    /// The write-guard boundary (spec §4.12): these methods must check
    /// `read_only` before acting.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::FsWriteTextFile | Self::TerminalCreate | Self::TerminalWrite | Self::TerminalKill
        )
    }
}

pub fn extract_text(value: &Value) -> Option<String> {
    value.get("text").and_then(|v| v.as_str()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_text_file_is_mutating() {
        assert!(HostMethod::from_str("fs/write_text_file").is_mutating());
    }

    #[test]
    fn read_text_file_is_not_mutating() {
        assert!(!HostMethod::from_str("fs/read_text_file").is_mutating());
    }

    #[test]
    fn unknown_permission_kind_falls_back_to_unknown_variant() {
        let json = r#"{"option_id":"x","kind":"something_new"}"#;
        let option: PermissionOption = serde_json::from_str(json).unwrap();
        assert_eq!(option.kind, PermissionKind::Unknown);
    }
}
