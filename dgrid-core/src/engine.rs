//! The Task Engine: one iteration of pull, claim, execute, report.
//!
//! State machine (design notes): `IDLE -> PULLING -> CLAIM_ATTEMPT ->
//! EXECUTING -> REPORTING -> IDLE`, with `CLAIM_ATTEMPT` looping back to
//! `PULLING` on a lost race and `REPORTING` falling back to a reset-and-retry
//! on a push failure. [`TaskEngine::run_once`] drives exactly one pass;
//! the worker binary calls it in a loop on `pull_interval`.

use crate::config::Config;
use crate::error::GridError;
use crate::job::{ClaimName, ExecutionRecord, JobDef};
use crate::repo_gateway::{is_push_rejection, PushOutcome, RepoGateway};
use crate::sandbox::SandboxRunner;
use crate::signing::TaskSigner;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happened during one [`TaskEngine::run_once`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No queued task was found (queue empty, or every candidate lost the
    /// claim race and nothing remained after rescanning).
    Idle,
    /// A task was claimed, executed, and its result reported.
    Executed { task_id: String, exit_code: i64 },
    /// A task was claimed but reporting lost the push race; the working
    /// copy was reset to remote and the engine gives up for this cycle
    /// rather than re-attempting blindly (the next cycle will re-pull and
    /// see this node's own in-progress claim is intact, or reconcile it).
    ReportDegraded { task_id: String },
}

pub struct TaskEngine<'a, G, S, T: ?Sized> {
    config: &'a Config,
    gateway: &'a mut G,
    sandbox: &'a S,
    signer: &'a T,
}

impl<'a, G, S, T> TaskEngine<'a, G, S, T>
where
    G: RepoGateway,
    S: SandboxRunner,
    T: TaskSigner + ?Sized,
{
    pub fn new(config: &'a Config, gateway: &'a mut G, sandbox: &'a S, signer: &'a T) -> Self {
        Self {
            config,
            gateway,
            sandbox,
            signer,
        }
    }

    /// Run exactly one pull -> claim -> execute -> report cycle.
    pub fn run_once(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let should_pull = if self.config.use_smart_polling {
            self.gateway
                .remote_has_updates()
                .context("checking remote for updates")?
        } else {
            true
        };
        if should_pull {
            self.gateway
                .pull_rebase()
                .context("pull_rebase before claim scan")?;
        }

        let candidates = self.scan_queue()?;
        for candidate in candidates {
            match self.try_claim(&candidate, now)? {
                Some(job) => return self.execute_and_report(job, now),
                None => continue,
            }
        }
        Ok(CycleOutcome::Idle)
    }

    /// List queued job definitions across the flat `tasks/queue/` layout and
    /// the priority sub-directory layout, ordered by priority then name.
    fn scan_queue(&self) -> Result<Vec<PathBuf>> {
        let queue_root = self.gateway.working_dir().join("tasks").join("queue");
        if !queue_root.exists() {
            return Ok(Vec::new());
        }

        let mut flat = list_regular_files(&queue_root)?;
        flat.sort();

        let mut prioritized = Vec::new();
        for priority in crate::job::Priority::SCAN_ORDER {
            let dir = queue_root.join(priority.dir_name());
            if dir.is_dir() {
                let mut files = list_regular_files(&dir)?;
                files.sort();
                prioritized.extend(files);
            }
        }

        prioritized.extend(flat);
        Ok(prioritized)
    }

    /// Attempt to claim one queued file: read + validate + (optionally)
    /// verify its signature, stage-rename it into `in_progress/`, and push.
    /// Returns `Ok(None)` if the claim lost the push race (someone else got
    /// there first), the file failed JSON/validation (routed straight to
    /// `failed/`), or signing is enabled and the signature is absent or
    /// untrusted — that last case is a pure skip: the task is left in
    /// `queue/` untouched and re-evaluated on every subsequent scan.
    fn try_claim(&mut self, queue_path: &Path, now: DateTime<Utc>) -> Result<Option<JobDef>> {
        let task_id = file_name_string(queue_path)?;
        let body = fs::read(queue_path).with_context(|| format!("reading {queue_path:?}"))?;
        let job: JobDef = match serde_json::from_slice(&body) {
            Ok(j) => j,
            Err(e) => {
                self.route_malformed_to_failed(&task_id, &format!("malformed job definition: {e}"), now)?;
                return Ok(None);
            }
        };

        if let Err(reason) = job.validate() {
            self.route_malformed_to_failed(&task_id, &reason, now)?;
            return Ok(None);
        }

        if self.signer.is_enabled() {
            let sig_path = queue_path.with_file_name(format!("{task_id}.sig"));
            let sig_bytes = fs::read(&sig_path).ok();
            if !self.signer.verify(&body, sig_bytes.as_deref()) {
                return Ok(None);
            }
        }

        let rel_src = relative_to_repo(self.gateway.working_dir(), queue_path);
        let claim = ClaimName::new(self.config.node_id.clone(), task_id.clone());
        let rel_dst = format!("tasks/in_progress/{}", claim.to_filename());

        self.gateway.stage_rename(&rel_src, &rel_dst)?;
        let message = format!("[D-GRID] {} acquires task {task_id}", self.config.node_id);
        match self.gateway.commit_and_push(&message, &[]) {
            Ok(PushOutcome::Pushed) | Ok(PushOutcome::NoChanges) => Ok(Some(job)),
            Err(e) if is_push_rejection(&e) => {
                self.gateway.reset_to_remote()?;
                Ok(None)
            }
            Err(e) => Err(GridError::transient(format!("claiming {task_id}"), e).into()),
        }
    }

    /// A job definition that cannot be claimed at all (bad JSON, failed
    /// validation) is moved directly to `failed/` without ever entering
    /// `in_progress/`, matching the Task-level error class.
    fn route_malformed_to_failed(&mut self, task_id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let rel_src = format!("tasks/queue/{task_id}");
        let rel_dst = format!("tasks/failed/{task_id}");
        self.gateway.stage_rename(&rel_src, &rel_dst)?;

        let record = ExecutionRecord::new(
            task_id,
            self.config.node_id.clone(),
            crate::job::ExitClass::Infra,
            String::new(),
            reason.to_string(),
            now,
        );
        let log_path = self
            .gateway
            .working_dir()
            .join("tasks")
            .join("failed")
            .join(format!("{task_id}.log"));
        fs::write(&log_path, serde_json::to_vec_pretty(&record)?)?;

        let message = format!("[D-GRID] reject task {task_id}: {reason}");
        match self.gateway.commit_and_push(&message, &[]) {
            Ok(_) => Ok(()),
            Err(e) if is_push_rejection(&e) => self.gateway.reset_to_remote(),
            Err(e) => Err(GridError::transient(format!("reporting rejection of {task_id}"), e).into()),
        }
    }

    fn execute_and_report(&mut self, job: JobDef, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let container_name = format!("dgrid-{}-{}", self.config.node_id, job.task_id);
        let timeout = Duration::from_secs(job.timeout_seconds as u64);
        let run = self.sandbox.run(&container_name, &job.script, timeout)?;

        let exit_code = run.exit_class.code();
        let record = ExecutionRecord::new(
            job.task_id.clone(),
            self.config.node_id.clone(),
            run.exit_class,
            run.stdout,
            run.stderr,
            now,
        );

        let terminal_status = if run.exit_class.is_success() {
            crate::status::TaskStatus::Completed
        } else {
            crate::status::TaskStatus::Failed
        };

        let claim = ClaimName::new(self.config.node_id.clone(), job.task_id.clone());
        let rel_src = format!("tasks/in_progress/{}", claim.to_filename());
        let rel_dst = format!(
            "tasks/{}/{}",
            terminal_status.dir_name(),
            job.task_id
        );
        self.gateway.stage_rename(&rel_src, &rel_dst)?;

        let log_path = self
            .gateway
            .working_dir()
            .join("tasks")
            .join(terminal_status.dir_name())
            .join(format!("{}.log", job.task_id));
        fs::write(&log_path, serde_json::to_vec_pretty(&record)?)?;

        let message = format!("[D-GRID] report {} ({})", job.task_id, terminal_status);
        match self.gateway.commit_and_push(&message, &[]) {
            Ok(_) => Ok(CycleOutcome::Executed {
                task_id: job.task_id,
                exit_code,
            }),
            Err(e) if is_push_rejection(&e) => {
                self.gateway.reset_to_remote()?;
                Ok(CycleOutcome::ReportDegraded {
                    task_id: job.task_id,
                })
            }
            Err(e) => Err(GridError::transient(format!("reporting {}", job.task_id), e).into()),
        }
    }
}

fn list_regular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {dir:?}"))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

fn file_name_string(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .context("path has no valid file name")
}

fn relative_to_repo(repo_root: &Path, path: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
