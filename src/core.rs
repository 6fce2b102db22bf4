//! Launcher logic behind `kagan core start|status|stop`. Kept separate from
//! [`crate`]'s CLI parsing so it can be exercised without spawning the
//! `kagan` binary itself.

use anyhow::{Context, Result, bail};
use kagan_runtime::lease::InstanceLease;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const START_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct EndpointInfo {
    transport: String,
    address: String,
    port: Option<u16>,
    pid: u32,
}

pub struct StatusReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub transport: Option<String>,
    pub address: Option<String>,
}

/// Locates the `kagan-runtime` binary next to the currently running `kagan`
/// executable, falling back to `PATH` lookup — mirrors how cargo lays out
/// workspace binaries side by side in `target/{debug,release}`.
fn locate_runtime_binary() -> PathBuf {
    let exe_name = if cfg!(windows) { "kagan-runtime.exe" } else { "kagan-runtime" };
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(exe_name);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from(exe_name)
}

fn endpoint_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join("endpoint.json")
}

fn read_endpoint(runtime_dir: &Path) -> Option<EndpointInfo> {
    let content = std::fs::read_to_string(endpoint_path(runtime_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 || *libc::__errno_location() != libc::ESRCH }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

/// Starts the core host for `project_dir`. When `foreground` is set this
/// blocks and forwards the child's exit code; otherwise it spawns the host
/// detached and returns once `endpoint.json` confirms it is listening.
pub fn start(project_dir: &Path, foreground: bool, transport: Option<&str>, port: Option<u16>) -> Result<()> {
    let runtime_dir = kagan_common::runtime_dir(project_dir);

    if let Some(record) = InstanceLease::peek(&runtime_dir) {
        if pid_is_alive(record.owner_pid) {
            bail!("kagan core is already running (pid {})", record.owner_pid);
        }
    }

    let binary = locate_runtime_binary();
    let mut command = Command::new(&binary);
    command.current_dir(project_dir);
    if let Some(transport) = transport {
        command.env("KAGAN_CORE_TRANSPORT", transport);
    }
    if let Some(port) = port {
        command.env("KAGAN_CORE_TCP_PORT", port.to_string());
    }

    if foreground {
        let status = command.status().with_context(|| format!("failed to launch {}", binary.display()))?;
        if !status.success() {
            bail!("kagan-runtime exited with {status}");
        }
        return Ok(());
    }

    let _ = std::fs::remove_file(endpoint_path(&runtime_dir));
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    command.spawn().with_context(|| format!("failed to launch {}", binary.display()))?;

    let deadline = Instant::now() + START_TIMEOUT;
    while Instant::now() < deadline {
        if read_endpoint(&runtime_dir).is_some() {
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    bail!("kagan-runtime did not report readiness within {START_TIMEOUT:?}")
}

pub fn status(project_dir: &Path) -> StatusReport {
    let runtime_dir = kagan_common::runtime_dir(project_dir);
    let Some(record) = InstanceLease::peek(&runtime_dir) else {
        return StatusReport { running: false, pid: None, transport: None, address: None };
    };
    if !pid_is_alive(record.owner_pid) {
        return StatusReport { running: false, pid: None, transport: None, address: None };
    }
    let endpoint = read_endpoint(&runtime_dir);
    StatusReport {
        running: true,
        pid: Some(record.owner_pid),
        transport: endpoint.as_ref().map(|e| e.transport.clone()),
        address: endpoint.as_ref().map(|e| match e.port {
            Some(port) => format!("{}:{port}", e.address),
            None => e.address.clone(),
        }),
    }
}

/// Sends SIGTERM to the owning process and waits for it to release the
/// lease, escalating to SIGKILL if it hasn't within [`STOP_TIMEOUT`].
#[cfg(unix)]
pub fn stop(project_dir: &Path) -> Result<()> {
    let runtime_dir = kagan_common::runtime_dir(project_dir);
    let Some(record) = InstanceLease::peek(&runtime_dir) else {
        bail!("kagan core is not running");
    };
    if !pid_is_alive(record.owner_pid) {
        bail!("kagan core is not running");
    }

    send_signal(record.owner_pid, libc::SIGTERM);

    let deadline = Instant::now() + STOP_TIMEOUT;
    while Instant::now() < deadline {
        if InstanceLease::peek(&runtime_dir).is_none() {
            return Ok(());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    send_signal(record.owner_pid, libc::SIGKILL);
    Ok(())
}

#[cfg(not(unix))]
pub fn stop(_project_dir: &Path) -> Result<()> {
    bail!("kagan core stop is only supported on unix platforms")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_is_not_running_without_a_lease() {
        let dir = tempdir().unwrap();
        unsafe {
            std::env::set_var("KAGAN_CORE_RUNTIME_DIR", dir.path());
        }
        let report = status(dir.path());
        assert!(!report.running);
        unsafe {
            std::env::remove_var("KAGAN_CORE_RUNTIME_DIR");
        }
    }

    #[test]
    fn stop_without_a_running_host_errors() {
        let dir = tempdir().unwrap();
        unsafe {
            std::env::set_var("KAGAN_CORE_RUNTIME_DIR", dir.path());
        }
        assert!(stop(dir.path()).is_err());
        unsafe {
            std::env::remove_var("KAGAN_CORE_RUNTIME_DIR");
        }
    }
}
