//! Single-writer lock on a node's working copy.
//!
//! Git's push-as-CAS protects the *shared* repository, but two worker
//! processes sharing one local clone would still corrupt each other's
//! uncommitted renames. This guards the working copy itself with a PID file
//! at `<repo_path>/.dgrid/worker.lock`. Stale locks (from crashed processes)
//! are detected by checking whether the recorded PID is still alive.

use anyhow::{bail, Result};
use std::fs;
use std::path::PathBuf;

/// RAII guard that holds the working-copy lock file and removes it on drop.
pub struct WorkerLock {
    path: PathBuf,
}

impl WorkerLock {
    /// Acquire the lock for the working copy at `repo_path`.
    ///
    /// - If no lock exists, writes the current PID and returns the guard.
    /// - If a stale lock exists (PID no longer running), overwrites it.
    /// - If a live lock exists and `force` is false, returns an error with the
    ///   existing PID in the message so the operator knows what to kill.
    /// - If a live lock exists and `force` is true, kills the old process and
    ///   acquires the lock.
    pub fn acquire(repo_path: &std::path::Path, force: bool) -> Result<Self> {
        let lock_dir = repo_path.join(".dgrid");
        fs::create_dir_all(&lock_dir)?;
        let lock_path = lock_dir.join("worker.lock");

        if lock_path.exists() {
            if let Ok(contents) = fs::read_to_string(&lock_path) {
                let existing_pid: Option<u32> = contents.trim().parse().ok();
                if let Some(pid) = existing_pid {
                    if is_pid_alive(pid) {
                        if force {
                            eprintln!(
                                "dgrid-worker: killing existing instance (PID {pid}) for {}",
                                repo_path.display()
                            );
                            kill_process(pid);
                            // Give it a moment to exit before overwriting the lock.
                            std::thread::sleep(std::time::Duration::from_millis(500));
                        } else {
                            bail!(
                                "Another dgrid-worker process (PID {pid}) already holds {}.\n\
                                 Use --force to override.",
                                repo_path.display()
                            );
                        }
                    }
                    // else: PID is not alive — stale lock, overwrite below.
                }
            }
        }

        let current_pid = std::process::id();
        fs::write(&lock_path, format!("{current_pid}\n"))?;

        Ok(Self { path: lock_path })
    }
}

impl Drop for WorkerLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Returns true if the process with `pid` is currently running.
///
/// Sends signal 0 via `kill -0`: this checks process existence without
/// delivering an actual signal and works on all Unix systems.
fn is_pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Send SIGTERM to a process so it can shut down cleanly.
fn kill_process(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args([&pid.to_string()])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file_with_current_pid() {
        let dir = TempDir::new().unwrap();
        let lock = WorkerLock::acquire(dir.path(), false).unwrap();
        let contents = fs::read_to_string(&lock.path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn drop_removes_lock_file() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join(".dgrid").join("worker.lock");
        {
            let _lock = WorkerLock::acquire(dir.path(), false).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn acquire_fails_while_live_process_holds_it_without_force() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().join(".dgrid");
        fs::create_dir_all(&lock_dir).unwrap();
        // Our own pid is always alive, so writing it directly simulates a
        // live holder without needing to spawn a second process.
        fs::write(lock_dir.join("worker.lock"), format!("{}\n", std::process::id())).unwrap();

        let err = WorkerLock::acquire(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("already holds"));
    }

    #[test]
    fn acquire_reclaims_a_stale_lock() {
        let dir = TempDir::new().unwrap();
        let lock_dir = dir.path().join(".dgrid");
        fs::create_dir_all(&lock_dir).unwrap();
        // PID 0 never refers to a live user process that `kill -0` can see.
        fs::write(lock_dir.join("worker.lock"), "0\n").unwrap();

        let lock = WorkerLock::acquire(dir.path(), false).unwrap();
        let contents = fs::read_to_string(&lock.path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
