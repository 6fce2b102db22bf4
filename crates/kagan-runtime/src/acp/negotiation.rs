//! Initialization handshake (spec §4.12 "Negotiation").

use serde::Deserialize;
use serde_json::{Value, json};

/// Builds the `initialize` params sent on agent start. The agent's
/// capability response is recorded but never used to reject the agent
/// (spec: "do not fail on empty capability responses... unsafe operations
/// are still blocked by our own write-guard").
pub fn initialize_params(read_only: bool) -> Value {
    json!({
        "fs": {
            "readTextFile": true,
            "writeTextFile": !read_only,
        },
        "terminal": !read_only,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub fs: Option<Value>,
    #[serde(default)]
    pub terminal: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_agent_gets_no_write_capability() {
        let params = initialize_params(true);
        assert_eq!(params["fs"]["writeTextFile"], false);
        assert_eq!(params["terminal"], false);
    }

    #[test]
    fn worker_agent_gets_full_capabilities() {
        let params = initialize_params(false);
        assert_eq!(params["fs"]["writeTextFile"], true);
        assert_eq!(params["terminal"], true);
    }
}
