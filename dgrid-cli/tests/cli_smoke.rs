//! Binary smoke tests for the `dgrid` CLI.
//!
//! These run the actual compiled binary via `assert_cmd` against a temp
//! repository working copy, so a regression in argument wiring or directory
//! layout would fail here even if the unit tests in `dgrid-core` pass.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[allow(deprecated)] // cargo_bin works fine for our use case
fn dgrid() -> Command {
    Command::cargo_bin("dgrid").unwrap()
}

fn initialized_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    dgrid()
        .args(["init", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success();
    dir
}

#[test]
fn binary_exists() {
    dgrid();
}

#[test]
fn version_subcommand() {
    dgrid()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("dgrid "));
}

#[test]
fn help_flag() {
    dgrid()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("D-GRID"));
}

#[test]
fn help_lists_subcommands() {
    let output = dgrid().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in &["init", "submit", "status", "sweep", "retry", "completions", "version"] {
        assert!(stdout.contains(cmd), "help text should mention '{cmd}' subcommand");
    }
}

#[test]
fn init_creates_directories() {
    let dir = TempDir::new().unwrap();
    dgrid()
        .args(["init", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success();

    for sub in &["queue", "in_progress", "completed", "failed"] {
        assert!(
            dir.path().join("tasks").join(sub).exists(),
            "init should create tasks/{sub}/"
        );
    }
    assert!(dir.path().join("nodes").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    dgrid().args(["init", "--repo-path"]).arg(dir.path()).assert().success();
    dgrid().args(["init", "--repo-path"]).arg(dir.path()).assert().success();
}

#[test]
fn submit_writes_job_definition() {
    let dir = initialized_repo();
    dgrid()
        .args(["submit", "t1", "echo hello", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("submitted t1"));

    let body = fs::read_to_string(dir.path().join("tasks/queue/t1")).unwrap();
    assert!(body.contains("\"echo hello\""));
    assert!(body.contains("\"timeout_seconds\""));
}

#[test]
fn submit_rejects_timeout_out_of_range() {
    let dir = initialized_repo();
    dgrid()
        .args(["submit", "t1", "echo hello", "--timeout", "5", "--repo-path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout"));
}

#[test]
fn submit_rejects_duplicate_task_id() {
    let dir = initialized_repo();
    dgrid()
        .args(["submit", "t1", "echo hello", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success();
    dgrid()
        .args(["submit", "t1", "echo again", "--repo-path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn submit_rejects_unknown_priority() {
    let dir = initialized_repo();
    dgrid()
        .args(["submit", "t1", "echo hi", "--priority", "urgent", "--repo-path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown priority"));
}

#[test]
fn status_reports_zero_counts_on_fresh_repo() {
    let dir = initialized_repo();
    dgrid()
        .args(["status", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("queue").and(predicate::str::contains("0")));
}

#[test]
fn status_fails_without_init() {
    let dir = TempDir::new().unwrap();
    dgrid()
        .args(["status", "--repo-path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("dgrid init"));
}

#[test]
fn retry_missing_task_fails() {
    let dir = initialized_repo();
    dgrid()
        .args(["retry", "nonexistent-task", "--repo-path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no failed task"));
}

#[test]
fn retry_moves_task_back_to_queue() {
    let dir = initialized_repo();
    fs::write(dir.path().join("tasks/failed/t1"), b"{}").unwrap();
    dgrid()
        .args(["retry", "t1", "--repo-path"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("requeued t1"));
    assert!(dir.path().join("tasks/queue/t1").exists());
    assert!(!dir.path().join("tasks/failed/t1").exists());
}

#[test]
fn completions_bash() {
    dgrid()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("complete -F _dgrid dgrid"));
}

#[test]
fn completions_zsh() {
    dgrid()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef dgrid"));
}

#[test]
fn completions_fish() {
    dgrid()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("complete -c dgrid"));
}

#[test]
fn completions_unknown_shell_fails() {
    dgrid()
        .args(["completions", "powershell"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported shell"));
}

#[test]
fn unknown_subcommand_fails() {
    dgrid()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
