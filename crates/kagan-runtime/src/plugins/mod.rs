//! Plugin Registry (spec §4.17): a capability-namespace registry that
//! plugin modules populate at startup, merged into the dispatch map
//! alongside the core capabilities in [`crate::dispatch`].

pub mod github;

use kagan_wire::ErrorCode;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type PluginFuture = Pin<Box<dyn Future<Output = Result<Value, PluginError>> + Send>>;
pub type PluginHandler = Arc<dyn Fn(Map<String, Value>) -> PluginFuture + Send + Sync>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct PluginError {
    pub code: ErrorCode,
    pub message: String,
}

impl PluginError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Capability namespaces starting with this prefix are reserved for the
/// core's own registrations and cannot be claimed by a plugin.
pub const RESERVED_PREFIX: &str = "kagan_core";

#[derive(Debug, Error)]
pub enum PluginRegistrationError {
    #[error("capability namespace {0} is reserved for core capabilities")]
    ReservedNamespace(String),
}

#[derive(Default)]
pub struct PluginRegistry {
    capabilities: HashMap<String, HashMap<String, PluginHandler>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        capability: &str,
        method: &str,
        handler: PluginHandler,
    ) -> Result<(), PluginRegistrationError> {
        if capability.starts_with(RESERVED_PREFIX) {
            return Err(PluginRegistrationError::ReservedNamespace(capability.to_string()));
        }
        self.capabilities
            .entry(capability.to_string())
            .or_default()
            .insert(method.to_string(), handler);
        Ok(())
    }

    pub fn lookup(&self, capability: &str, method: &str) -> Option<PluginHandler> {
        self.capabilities.get(capability)?.get(method).cloned()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> PluginHandler {
        Arc::new(|_params| Box::pin(async { Ok(Value::Null) }))
    }

    #[test]
    fn reserved_namespace_is_rejected() {
        let mut registry = PluginRegistry::new();
        let err = registry.register("kagan_core_tasks", "x", noop_handler()).unwrap_err();
        assert!(matches!(err, PluginRegistrationError::ReservedNamespace(_)));
    }

    #[test]
    fn registered_method_is_found_by_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register("kagan_github", "contract_probe", noop_handler()).unwrap();
        assert!(registry.lookup("kagan_github", "contract_probe").is_some());
        assert!(registry.lookup("kagan_github", "missing").is_none());
        assert!(registry.has_capability("kagan_github"));
    }
}
