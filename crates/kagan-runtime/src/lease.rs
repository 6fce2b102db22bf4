//! Instance Lease (spec component #1): at-most-one core per repo root.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use std::fs::File;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease already held by pid {owner_pid} on {owner_hostname}")]
    HeldByOther { owner_pid: u32, owner_hostname: String },

    #[error("io error acquiring lease: {0}")]
    Io(#[from] std::io::Error),

    #[error("lease json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Field order matches the §4.1 schema and is alphabetically sorted to
/// satisfy the "sorted keys, 2-space indent" layout requirement (spec §6)
/// without needing a map with explicit key ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub acquired_at: i64,
    pub heartbeat_interval_seconds: u64,
    pub last_heartbeat_at: i64,
    pub owner_hostname: String,
    pub owner_pid: u32,
    pub stale_after_seconds: u64,
    pub stale_reclaim_rules: Vec<String>,
    pub version: u32,
}

const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 2;
const DEFAULT_STALE_AFTER_SECONDS: u64 = 10;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Returns true if a process with this pid appears alive on this host.
/// Sending signal 0 performs existence/permission checks without delivering
/// an actual signal.
#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 || *libc::__errno_location() != libc::ESRCH }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

pub struct InstanceLease {
    lock_path: PathBuf,
    lease_path: PathBuf,
    lock_file: Option<File>,
    record: LeaseRecord,
}

impl InstanceLease {
    /// Acquire the lease at `runtime_dir`. Retries exactly once after a
    /// stale reclaim, never recursively.
    pub fn acquire(runtime_dir: &Path) -> Result<Self, LeaseError> {
        Self::try_acquire(runtime_dir, true)
    }

    /// Reads the lease record at `runtime_dir` without attempting to
    /// acquire it, for status/diagnostic callers that just want to know
    /// who (if anyone) currently owns it.
    pub fn peek(runtime_dir: &Path) -> Option<LeaseRecord> {
        Self::read_record(&runtime_dir.join("core.lease.json"))
    }

    fn try_acquire(runtime_dir: &Path, allow_reclaim: bool) -> Result<Self, LeaseError> {
        std::fs::create_dir_all(runtime_dir)?;
        let lock_path = runtime_dir.join("core.instance.lock");
        let lease_path = runtime_dir.join("core.lease.json");

        let lock_file = File::create(&lock_path)?;
        match fs2::FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => {
                let record = LeaseRecord {
                    acquired_at: now_unix(),
                    heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
                    last_heartbeat_at: now_unix(),
                    owner_hostname: hostname(),
                    owner_pid: std::process::id(),
                    stale_after_seconds: DEFAULT_STALE_AFTER_SECONDS,
                    stale_reclaim_rules: vec![
                        "same_hostname".to_string(),
                        "owner_pid_dead".to_string(),
                        "heartbeat_stale".to_string(),
                    ],
                    version: 1,
                };
                let mut lease = Self {
                    lock_path,
                    lease_path,
                    lock_file: Some(lock_file),
                    record,
                };
                lease.write_record()?;
                Ok(lease)
            }
            Err(_) if allow_reclaim => {
                if Self::reclaim_if_stale(&lease_path) {
                    Self::try_acquire(runtime_dir, false)
                } else {
                    let existing = Self::read_record(&lease_path).unwrap_or(LeaseRecord {
                        acquired_at: 0,
                        heartbeat_interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
                        last_heartbeat_at: 0,
                        owner_hostname: "unknown".to_string(),
                        owner_pid: 0,
                        stale_after_seconds: DEFAULT_STALE_AFTER_SECONDS,
                        stale_reclaim_rules: vec![],
                        version: 1,
                    });
                    Err(LeaseError::HeldByOther {
                        owner_pid: existing.owner_pid,
                        owner_hostname: existing.owner_hostname,
                    })
                }
            }
            Err(_) => Err(LeaseError::HeldByOther {
                owner_pid: 0,
                owner_hostname: "unknown".to_string(),
            }),
        }
    }

    /// Reclaim is permitted only when the hostname matches ours, the owner
    /// pid is no longer alive, and the heartbeat has gone stale. Corrupt
    /// lease JSON is treated as missing (never reclaimed).
    fn reclaim_if_stale(lease_path: &Path) -> bool {
        let Some(record) = Self::read_record(lease_path) else {
            return false;
        };
        if record.owner_hostname != hostname() {
            return false;
        }
        if pid_is_alive(record.owner_pid) {
            return false;
        }
        let age = now_unix() - record.last_heartbeat_at;
        if age <= record.stale_after_seconds as i64 {
            return false;
        }
        let _ = std::fs::remove_file(lease_path);
        let _ = std::fs::remove_file(lease_path.with_file_name("core.instance.lock"));
        true
    }

    fn read_record(lease_path: &Path) -> Option<LeaseRecord> {
        let content = std::fs::read_to_string(lease_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_record(&mut self) -> Result<(), LeaseError> {
        let json = serde_json::to_string_pretty(&self.record)?;
        let mut file = File::create(&self.lease_path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Rewrites `last_heartbeat_at`, preserving other fields. Call every
    /// `heartbeat_interval_seconds`.
    pub fn heartbeat(&mut self) -> Result<(), LeaseError> {
        self.record.last_heartbeat_at = now_unix();
        self.write_record()
    }

    pub fn release(mut self) {
        if let Some(lock_file) = self.lock_file.take() {
            let _ = fs2::FileExt::unlock(&lock_file);
        }
        let _ = std::fs::remove_file(&self.lease_path);
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_lease_record_with_our_pid() {
        let dir = tempdir().unwrap();
        let lease = InstanceLease::acquire(dir.path()).unwrap();
        assert_eq!(lease.record.owner_pid, std::process::id());
        assert!(dir.path().join("core.lease.json").exists());
    }

    #[test]
    fn second_acquire_in_same_process_fails_since_lock_is_held() {
        let dir = tempdir().unwrap();
        let _lease = InstanceLease::acquire(dir.path()).unwrap();
        let second = InstanceLease::try_acquire(dir.path(), false);
        assert!(second.is_err());
    }

    #[test]
    fn corrupt_lease_json_is_treated_as_missing_not_reclaimed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("core.lease.json"), "not json").unwrap();
        assert!(!InstanceLease::reclaim_if_stale(&dir.path().join("core.lease.json")));
    }

    #[test]
    fn stale_local_dead_pid_reclaims() {
        let dir = tempdir().unwrap();
        let lease_path = dir.path().join("core.lease.json");
        let record = LeaseRecord {
            acquired_at: 0,
            heartbeat_interval_seconds: 2,
            last_heartbeat_at: 0,
            owner_hostname: hostname(),
            owner_pid: 999_999, // assumed dead
            stale_after_seconds: 10,
            stale_reclaim_rules: vec![],
            version: 1,
        };
        std::fs::write(&lease_path, serde_json::to_string(&record).unwrap()).unwrap();
        assert!(InstanceLease::reclaim_if_stale(&lease_path));
        assert!(!lease_path.exists());
    }

    #[test]
    fn cross_host_lease_is_never_reclaimed() {
        let dir = tempdir().unwrap();
        let lease_path = dir.path().join("core.lease.json");
        let record = LeaseRecord {
            acquired_at: 0,
            heartbeat_interval_seconds: 2,
            last_heartbeat_at: 0,
            owner_hostname: "some-other-host".to_string(),
            owner_pid: 999_999,
            stale_after_seconds: 10,
            stale_reclaim_rules: vec![],
            version: 1,
        };
        std::fs::write(&lease_path, serde_json::to_string(&record).unwrap()).unwrap();
        assert!(!InstanceLease::reclaim_if_stale(&lease_path));
    }

    #[test]
    fn heartbeat_updates_timestamp() {
        let dir = tempdir().unwrap();
        let mut lease = InstanceLease::acquire(dir.path()).unwrap();
        let before = lease.record.last_heartbeat_at;
        std::thread::sleep(std::time::Duration::from_millis(1100));
        lease.heartbeat().unwrap();
        assert!(lease.record.last_heartbeat_at >= before);
    }
}
