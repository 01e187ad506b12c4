//! The Orphan Sweeper: reclaims `in_progress/` tasks whose owning node has
//! gone silent past the liveness window, putting them back in `queue/` so a
//! live node can pick them up.
//!
//! Runs independently of any single worker's claim loop — typically as its
//! own periodic job, same repository, same push-as-CAS discipline. A
//! sweeper losing its own push is tolerated exactly like a worker losing a
//! claim race: reset to remote and let the next pass re-evaluate.

use crate::error::GridError;
use crate::node::NodeRecord;
use crate::repo_gateway::{is_push_rejection, PushOutcome, RepoGateway};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One `in_progress/` file reclaimed back to `queue/` in a sweep pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reclaimed {
    pub node_id: String,
    pub task_id: String,
}

pub struct OrphanSweeper<'a, G> {
    gateway: &'a mut G,
    liveness_window: Duration,
}

impl<'a, G: RepoGateway> OrphanSweeper<'a, G> {
    pub fn new(gateway: &'a mut G, liveness_window: Duration) -> Self {
        Self {
            gateway,
            liveness_window,
        }
    }

    /// Run one sweep: pull latest, compute the live-node set from
    /// `nodes/`, reclaim every `in_progress/` file owned by a dead node,
    /// and push once for the whole batch.
    pub fn sweep_once(&mut self, now: DateTime<Utc>) -> Result<Vec<Reclaimed>> {
        self.gateway.pull_rebase().context("pull_rebase before sweep")?;

        let live_nodes = self.live_node_ids(now)?;
        let in_progress_dir = self.gateway.working_dir().join("tasks").join("in_progress");
        if !in_progress_dir.exists() {
            return Ok(Vec::new());
        }

        let mut reclaimed = Vec::new();
        for entry in fs::read_dir(&in_progress_dir)
            .with_context(|| format!("listing {in_progress_dir:?}"))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            let Some(claim) = crate::job::ClaimName::parse(&filename) else {
                continue;
            };
            if live_nodes.contains(&claim.node_id) {
                continue;
            }

            let rel_src = format!("tasks/in_progress/{filename}");
            let rel_dst = format!("tasks/queue/{}", claim.task_id);
            self.gateway.stage_rename(&rel_src, &rel_dst)?;
            reclaimed.push(Reclaimed {
                node_id: claim.node_id,
                task_id: claim.task_id,
            });
        }

        if reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let message = format!("[D-GRID] auto-cleanup {} orphan tasks", reclaimed.len());
        match self.gateway.commit_and_push(&message, &[]) {
            Ok(PushOutcome::Pushed) | Ok(PushOutcome::NoChanges) => Ok(reclaimed),
            Err(e) if is_push_rejection(&e) => {
                // Another sweeper or worker won the race for these same
                // files; reset and report nothing reclaimed this pass.
                self.gateway.reset_to_remote()?;
                Ok(Vec::new())
            }
            Err(e) => Err(GridError::transient("pushing orphan sweep", e).into()),
        }
    }

    /// Read every `nodes/<node-id>` record and keep the ids whose heartbeat
    /// is within the liveness window.
    fn live_node_ids(&self, now: DateTime<Utc>) -> Result<std::collections::HashSet<String>> {
        let nodes_dir = self.gateway.working_dir().join("nodes");
        let window = chrono::Duration::from_std(self.liveness_window).unwrap_or(chrono::Duration::zero());
        let mut live = std::collections::HashSet::new();
        if !nodes_dir.exists() {
            return Ok(live);
        }
        for entry in fs::read_dir(&nodes_dir).with_context(|| format!("listing {nodes_dir:?}"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let record = read_node_record(&entry.path())?;
            if record.is_alive(now, window) {
                live.insert(record.node_id);
            }
        }
        Ok(live)
    }
}

fn read_node_record(path: &Path) -> Result<NodeRecord> {
    let body = fs::read(path).with_context(|| format!("reading {path:?}"))?;
    serde_json::from_slice(&body).with_context(|| format!("parsing node record {path:?}"))
}
