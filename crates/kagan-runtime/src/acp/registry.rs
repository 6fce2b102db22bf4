//! Agent Backend Registry ([SUPPLEMENT], not present in the distilled
//! spec but required by `Task.agent_backend` and component #12's "resolve
//! the agent command for this task" step). A static table of launchable
//! ACP-speaking agent commands, shaped like the teacher's small
//! serde-derived config structs in `factory/models.rs` (`Project`, `Issue`)
//! rather than a dynamic plugin system — this is fixed, in-process config.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBackend {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("unknown agent backend: {0}")]
    Unknown(String),
}

/// The built-in backends known to this host. `claude` and `codex` are
/// illustrative entries matching the command-line agents most commonly
/// wrapped in ACP today; both accept an `--acp` flag to switch from their
/// native CLI protocol to ACP JSON-RPC over stdio.
pub fn builtin_backends() -> Vec<AgentBackend> {
    vec![
        AgentBackend {
            id: "claude".to_string(),
            command: std::env::var("KAGAN_CLAUDE_CMD").unwrap_or_else(|_| "claude".to_string()),
            args: vec!["--acp".to_string()],
        },
        AgentBackend {
            id: "codex".to_string(),
            command: std::env::var("KAGAN_CODEX_CMD").unwrap_or_else(|_| "codex".to_string()),
            args: vec!["acp".to_string()],
        },
    ]
}

pub fn resolve_backend(id: Option<&str>) -> Result<AgentBackend, BackendError> {
    let id = id.unwrap_or("claude");
    builtin_backends()
        .into_iter()
        .find(|b| b.id == id)
        .ok_or_else(|| BackendError::Unknown(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_is_claude() {
        let backend = resolve_backend(None).unwrap();
        assert_eq!(backend.id, "claude");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(resolve_backend(Some("nonexistent")).is_err());
    }

    #[test]
    fn codex_backend_resolves() {
        let backend = resolve_backend(Some("codex")).unwrap();
        assert_eq!(backend.command.is_empty(), false);
    }
}
