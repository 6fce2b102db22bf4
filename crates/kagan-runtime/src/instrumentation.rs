//! Instrumentation (spec §4.19, component #19): opt-in counters/timings
//! around dispatch hot paths. Disabled by default so the common case pays
//! no bookkeeping cost; gated by `KAGAN_CORE_INSTRUMENTATION`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn env_flag_enabled(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub total_millis: u64,
    pub max_millis: u64,
}

#[derive(Default)]
struct Counter {
    count: AtomicU64,
    total_millis: AtomicU64,
    max_millis: AtomicU64,
}

pub struct Instrumentation {
    enabled: bool,
    log_samples: bool,
    counters: DashMap<String, Counter>,
}

impl Instrumentation {
    /// Reads `KAGAN_CORE_INSTRUMENTATION` / `KAGAN_CORE_INSTRUMENTATION_LOG`
    /// once at construction; the core does not poll the environment again.
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag_enabled("KAGAN_CORE_INSTRUMENTATION"),
            log_samples: env_flag_enabled("KAGAN_CORE_INSTRUMENTATION_LOG"),
            counters: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            log_samples: false,
            counters: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, label: &str, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let millis = elapsed.as_millis() as u64;
        let counter = self.counters.entry(label.to_string()).or_default();
        counter.count.fetch_add(1, Ordering::Relaxed);
        counter.total_millis.fetch_add(millis, Ordering::Relaxed);
        counter.max_millis.fetch_max(millis, Ordering::Relaxed);

        if self.log_samples {
            tracing::info!(label, millis, "instrumentation sample");
        }
    }

    pub fn snapshot(&self) -> std::collections::HashMap<String, TimingStats> {
        self.counters
            .iter()
            .map(|entry| {
                let count = entry.count.load(Ordering::Relaxed);
                let total_millis = entry.total_millis.load(Ordering::Relaxed);
                let max_millis = entry.max_millis.load(Ordering::Relaxed);
                (
                    entry.key().clone(),
                    TimingStats {
                        count,
                        total_millis,
                        max_millis,
                    },
                )
            })
            .collect()
    }
}

/// Times a closure, recording the sample under `label` iff instrumentation
/// is enabled. Zero overhead beyond one atomic load when disabled.
pub async fn timed<F, Fut, T>(instrumentation: &Instrumentation, label: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    if !instrumentation.is_enabled() {
        return f().await;
    }
    let start = std::time::Instant::now();
    let result = f().await;
    instrumentation.record(label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_instrumentation_records_nothing() {
        let instrumentation = Instrumentation::disabled();
        timed(&instrumentation, "dispatch.tasks.get", || async { 1 }).await;
        assert!(instrumentation.snapshot().is_empty());
    }

    #[test]
    fn record_accumulates_count_and_max() {
        let instrumentation = Instrumentation { enabled: true, log_samples: false, counters: DashMap::new() };
        instrumentation.record("x", Duration::from_millis(10));
        instrumentation.record("x", Duration::from_millis(30));
        let snapshot = instrumentation.snapshot();
        let stats = snapshot.get("x").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_millis, 40);
        assert_eq!(stats.max_millis, 30);
    }
}
