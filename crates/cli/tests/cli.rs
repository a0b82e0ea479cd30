//! Command-line behaviour that does not need a live engine.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `taskwatch` command isolated from the caller's environment.
fn taskwatch() -> Command {
    let mut cmd = cargo_bin_cmd!("taskwatch");
    cmd.env_remove("TASKWATCH_API_TOKEN")
        .env_remove("TASKWATCH_ENGINE_URL")
        .env_remove("TASKWATCH_TRANSPORT")
        .env_remove("TASKWATCH_POLL_INTERVAL_MS")
        .env_remove("TASKWATCH_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    taskwatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("cancel"));
}

#[test]
fn test_watch_without_token_fails() {
    let dir = TempDir::new().unwrap();
    taskwatch()
        .args(["--root", dir.path().to_str().unwrap(), "watch", "T1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not authenticated"));
}

#[test]
fn test_cancel_without_token_fails() {
    let dir = TempDir::new().unwrap();
    taskwatch()
        .args(["--root", dir.path().to_str().unwrap(), "cancel", "T1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("TASKWATCH_API_TOKEN is not set"));
}

#[test]
fn test_unknown_transport_is_rejected() {
    taskwatch()
        .args(["--transport", "carrier-pigeon", "watch", "T1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown transport"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join(".taskwatch");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "poll_interval_ms = 0\n").unwrap();

    taskwatch()
        .env("TASKWATCH_API_TOKEN", "token")
        .args(["--root", dir.path().to_str().unwrap(), "watch", "T1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval_ms"));
}

#[test]
fn test_submit_requires_prompt() {
    taskwatch()
        .arg("submit")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--prompt"));
}
