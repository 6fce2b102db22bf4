//! Integration tests for the `kagan` CLI launcher.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn kagan() -> Command {
    cargo_bin_cmd!("kagan")
}

#[test]
fn help_lists_core_subcommand() {
    kagan().arg("--help").assert().success().stdout(predicate::str::contains("core"));
}

#[test]
fn version_succeeds() {
    kagan().arg("--version").assert().success();
}

#[test]
fn status_reports_not_running_for_fresh_project() {
    let dir = TempDir::new().unwrap();
    kagan()
        .current_dir(dir.path())
        .env("KAGAN_CORE_RUNTIME_DIR", dir.path().join("runtime"))
        .args(["core", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn stop_without_a_running_host_fails() {
    let dir = TempDir::new().unwrap();
    kagan()
        .current_dir(dir.path())
        .env("KAGAN_CORE_RUNTIME_DIR", dir.path().join("runtime"))
        .args(["core", "stop"])
        .assert()
        .failure();
}
