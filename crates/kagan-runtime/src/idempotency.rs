//! Idempotency Cache (spec §4.6): fingerprint-keyed dedup of mutations.
//!
//! Keyed by `(capability, method, fingerprint(idempotency_key, session_id))`
//! with an LRU of size >= 512. A pending entry holds a `tokio::sync::Notify`
//! so a concurrently-retrying client awaits the in-flight handler instead of
//! racing it, matching the "await its completion future" requirement.

use kagan_wire::CoreResponse;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const MIN_CACHE_SIZE: usize = 512;

/// Methods eligible for idempotency-key dedup (spec §4.6 allow-list).
/// Matched against the method's trailing verb across capabilities, e.g.
/// "tasks.create" and "sessions.create" both end in "create".
pub const IDEMPOTENT_MUTATION_METHODS: &[&str] = &[
    "create", "update", "delete", "move", "submit", "approve", "reject", "merge", "rebase", "kill",
    "add_repo",
];

pub fn is_idempotent_method(method: &str) -> bool {
    IDEMPOTENT_MUTATION_METHODS.contains(&method)
}

enum Entry {
    Pending(Arc<Notify>),
    Completed(CoreResponse),
}

pub struct IdempotencyCache {
    entries: Mutex<LruCache<String, Entry>>,
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(MIN_CACHE_SIZE)
    }
}

pub enum Lookup {
    /// No entry exists yet; caller must run the handler and call
    /// `complete` with the result.
    Miss,
    /// A completed entry exists; return it directly.
    Hit(CoreResponse),
    /// A pending entry exists; await `notified()` then re-check.
    InFlight(Arc<Notify>),
}

impl IdempotencyCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
        }
    }

    pub fn fingerprint(capability: &str, method: &str, idempotency_key: &str, session_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(capability.as_bytes());
        hasher.update([0]);
        hasher.update(method.as_bytes());
        hasher.update([0]);
        hasher.update(idempotency_key.as_bytes());
        hasher.update([0]);
        hasher.update(session_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns `Miss` and inserts a pending entry atomically, so the caller
    /// that observes `Miss` is guaranteed to be the one running the handler.
    pub fn begin(&self, key: &str) -> Lookup {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(Entry::Completed(resp)) => Lookup::Hit(resp.clone()),
            Some(Entry::Pending(notify)) => Lookup::InFlight(notify.clone()),
            None => {
                entries.put(key.to_string(), Entry::Pending(Arc::new(Notify::new())));
                Lookup::Miss
            }
        }
    }

    pub fn complete(&self, key: &str, response: CoreResponse) {
        let mut entries = self.entries.lock().unwrap();
        let notify = match entries.peek(key) {
            Some(Entry::Pending(notify)) => Some(notify.clone()),
            _ => None,
        };
        entries.put(key.to_string(), Entry::Completed(response));
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn fingerprint_is_stable_for_same_inputs() {
        let a = IdempotencyCache::fingerprint("tasks", "create", "k1", "sess-1");
        let b = IdempotencyCache::fingerprint("tasks", "create", "k1", "sess-1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_across_sessions() {
        let a = IdempotencyCache::fingerprint("tasks", "create", "k1", "sess-1");
        let b = IdempotencyCache::fingerprint("tasks", "create", "k1", "sess-2");
        assert_ne!(a, b);
    }

    #[test]
    fn first_begin_misses_second_hits_pending() {
        let cache = IdempotencyCache::new(4);
        assert!(matches!(cache.begin("k"), Lookup::Miss));
        assert!(matches!(cache.begin("k"), Lookup::InFlight(_)));
    }

    #[test]
    fn completed_entry_is_returned_on_later_lookups() {
        let cache = IdempotencyCache::new(4);
        assert!(matches!(cache.begin("k"), Lookup::Miss));
        cache.complete("k", CoreResponse::success("req-1", Map::new()));
        match cache.begin("k") {
            Lookup::Hit(resp) => assert_eq!(resp.request_id, "req-1"),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn only_allow_listed_verbs_are_idempotent() {
        assert!(is_idempotent_method("create"));
        assert!(is_idempotent_method("rebase"));
        assert!(!is_idempotent_method("get"));
        assert!(!is_idempotent_method("list"));
    }
}
