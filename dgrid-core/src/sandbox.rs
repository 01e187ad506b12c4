//! The hardened sandbox a claimed task's script executes inside.
//!
//! Polymorphic over `{run(image, script, quotas, timeout) -> (exit, stdout,
//! stderr)}` (design notes); the default implementation shells out to
//! `docker run` with every isolation knob the component design table lists.
//! Other container runtimes (Podman, gVisor) satisfy the same contract.

use crate::config::{Config, SANDBOX_IMAGE, SANDBOX_PIDS_LIMIT, SANDBOX_USER};
use crate::job::ExitClass;
use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// Result of one sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_class: ExitClass,
    pub stdout: String,
    pub stderr: String,
}

pub trait SandboxRunner {
    /// Run `script` with a wall-clock `timeout`, returning the classified
    /// exit plus captured (untruncated — truncation happens when the
    /// execution record is built) stdout/stderr.
    fn run(&self, container_name: &str, script: &str, timeout: Duration) -> Result<RunOutput>;

    /// Best-effort cleanup of stopped containers/dangling images, used by
    /// the health monitor's self-healing path when disk usage is high.
    fn prune(&self) -> Result<()>;
}

/// `docker run` backed implementation with every isolation knob the
/// execution table specifies: no network, read-only root, capped CPU/memory,
/// a process ceiling, a fixed non-root user, and the fixed sandbox image.
pub struct DockerSandboxRunner {
    cpus: String,
    memory: String,
}

impl DockerSandboxRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            cpus: config.docker_cpus.clone(),
            memory: config.docker_memory.clone(),
        }
    }
}

impl SandboxRunner for DockerSandboxRunner {
    fn run(&self, container_name: &str, script: &str, timeout: Duration) -> Result<RunOutput> {
        let mut cmd = Command::new("timeout");
        cmd.arg(timeout.as_secs().to_string());
        cmd.arg("docker").arg("run").arg("--rm");
        cmd.args(["--name", container_name]);
        cmd.arg("--network=none");
        cmd.arg("--read-only");
        cmd.arg(format!("--cpus={}", self.cpus));
        cmd.arg(format!("--memory={}", self.memory));
        cmd.arg(format!("--pids-limit={SANDBOX_PIDS_LIMIT}"));
        cmd.arg(format!("--user={SANDBOX_USER}"));
        cmd.arg(SANDBOX_IMAGE);
        cmd.args(["sh", "-c", script]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().context("failed to spawn docker run")?;

        // Drain stdout on a separate thread: reading both streams to
        // completion sequentially on one thread deadlocks if the child fills
        // the stderr pipe buffer while we're still blocked reading stdout.
        let stdout_handle = child
            .stdout
            .take()
            .map(|mut out| thread::spawn(move || -> String {
                let mut buf = String::new();
                let _ = out.read_to_string(&mut buf);
                buf
            }));

        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }

        let stdout = stdout_handle.and_then(|h| h.join().ok()).unwrap_or_default();
        let status = child.wait().context("failed to wait on docker run")?;

        // `timeout` exits 124 when it had to kill the wrapped command.
        let exit_class = match status.code() {
            Some(124) => ExitClass::Timeout,
            Some(0) => ExitClass::Success,
            Some(code) => ExitClass::Process(code),
            None => ExitClass::Infra,
        };

        Ok(RunOutput {
            exit_class,
            stdout,
            stderr,
        })
    }

    fn prune(&self) -> Result<()> {
        let _ = Command::new("docker")
            .args(["container", "prune", "-f"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = Command::new("docker")
            .args(["image", "prune", "-f"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory stand-in for tests that exercise the engine without
    /// actually invoking Docker.
    pub struct FakeSandboxRunner {
        pub output: RunOutput,
    }

    impl SandboxRunner for FakeSandboxRunner {
        fn run(&self, _container_name: &str, _script: &str, _timeout: Duration) -> Result<RunOutput> {
            Ok(self.output.clone())
        }

        fn prune(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fake_runner_returns_configured_output() {
        let runner = FakeSandboxRunner {
            output: RunOutput {
                exit_class: ExitClass::Success,
                stdout: "hello\n".to_string(),
                stderr: String::new(),
            },
        };
        let out = runner.run("c1", "echo hello", Duration::from_secs(10)).unwrap();
        assert_eq!(out.exit_class, ExitClass::Success);
        assert_eq!(out.stdout, "hello\n");
    }
}
