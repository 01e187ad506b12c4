//! Node liveness records (`nodes/<node-id>`) and the registry operations
//! that keep them current.

use crate::error::GridError;
use crate::repo_gateway::{is_push_rejection, RepoGateway};
use crate::status::NodeStatus;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Capabilities advertised at registration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub cpu_count: u32,
    pub memory_gb: f64,
    pub disk_gb: f64,
}

/// A node's liveness + capability record, as stored at `nodes/<node-id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub cpu_count: u32,
    pub memory_gb: f64,
    pub disk_gb: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub status: NodeStatusWire,
}

/// Wire representation of [`NodeStatus`] (serde needs its own type since
/// `NodeStatus` intentionally keeps `parse`/`as_str` rather than deriving).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatusWire {
    Active,
    Inactive,
}

impl From<NodeStatus> for NodeStatusWire {
    fn from(s: NodeStatus) -> Self {
        match s {
            NodeStatus::Active => Self::Active,
            NodeStatus::Inactive => Self::Inactive,
        }
    }
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>, caps: Capabilities, now: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            cpu_count: caps.cpu_count,
            memory_gb: caps.memory_gb,
            disk_gb: caps.disk_gb,
            last_heartbeat: now,
            status: NodeStatusWire::Active,
        }
    }

    /// Update `last_heartbeat` in place. Never decreases the timestamp: if
    /// `now` is somehow behind the recorded value (clock skew), the existing
    /// value is kept, preserving the heartbeat-monotonicity invariant.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
        self.status = NodeStatusWire::Active;
    }

    /// Whether this node is within the liveness window as of `now`.
    pub fn is_alive(&self, now: DateTime<Utc>, liveness_window: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) < liveness_window
    }
}

impl Capabilities {
    /// Gather this host's capabilities via `sysinfo`, for populating a new
    /// node's registration record at startup.
    pub fn detect(repo_path: &Path) -> Self {
        use sysinfo::{Disks, System};

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_count = system.cpus().len() as u32;
        let memory_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);

        let disks = Disks::new_with_refreshed_list();
        let mut best: Option<(&Path, &sysinfo::Disk)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if repo_path.starts_with(mount) {
                let is_better = match best {
                    Some((m, _)) => mount.components().count() > m.components().count(),
                    None => true,
                };
                if is_better {
                    best = Some((mount, disk));
                }
            }
        }
        let disk_gb = best
            .map(|(_, d)| d.total_space() as f64 / (1024.0 * 1024.0 * 1024.0))
            .unwrap_or(0.0);

        Self {
            cpu_count,
            memory_gb,
            disk_gb,
        }
    }
}

/// Create or refresh the caller's `nodes/<node-id>` record, commit, and push.
/// Losing the push race against an unrelated commit is tolerated the same
/// way every other transaction against this repository is: reset to remote
/// and let the next heartbeat tick retry.
pub fn register_or_heartbeat<G: RepoGateway>(
    gateway: &mut G,
    node_id: &str,
    caps: Capabilities,
    now: DateTime<Utc>,
) -> Result<()> {
    let nodes_dir = gateway.working_dir().join("nodes");
    fs::create_dir_all(&nodes_dir)?;
    let path = nodes_dir.join(node_id);

    let record = match fs::read(&path) {
        Ok(bytes) => {
            let mut existing: NodeRecord =
                serde_json::from_slice(&bytes).unwrap_or_else(|_| NodeRecord::new(node_id, caps, now));
            existing.heartbeat(now);
            existing
        }
        Err(_) => NodeRecord::new(node_id, caps, now),
    };

    fs::write(&path, serde_json::to_vec_pretty(&record)?)?;

    let message = format!("[D-GRID] heartbeat {node_id}");
    match gateway.commit_and_push(&message, &[]) {
        Ok(_) => Ok(()),
        Err(e) if is_push_rejection(&e) => gateway.reset_to_remote(),
        Err(e) => Err(GridError::transient(format!("heartbeating {node_id}"), e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_gateway::PushOutcome;
    use chrono::Duration;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FakeGateway {
        dir: PathBuf,
    }

    impl RepoGateway for FakeGateway {
        fn open_or_clone(&mut self, _url: &str, _shallow: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn remote_has_updates(&self) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn pull_rebase(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn stage_rename(&self, _src: &str, _dst: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn commit_and_push(&self, _message: &str, _paths: &[&str]) -> anyhow::Result<PushOutcome> {
            Ok(PushOutcome::Pushed)
        }
        fn reset_to_remote(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn working_dir(&self) -> &Path {
            &self.dir
        }
    }

    #[test]
    fn register_or_heartbeat_creates_record_on_first_call() {
        let tmp = TempDir::new().unwrap();
        let mut gw = FakeGateway { dir: tmp.path().to_path_buf() };
        let now = Utc::now();
        register_or_heartbeat(&mut gw, "workerA", caps(), now).unwrap();

        let bytes = fs::read(tmp.path().join("nodes").join("workerA")).unwrap();
        let record: NodeRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.node_id, "workerA");
        assert_eq!(record.last_heartbeat, now);
    }

    #[test]
    fn register_or_heartbeat_advances_existing_record() {
        let tmp = TempDir::new().unwrap();
        let mut gw = FakeGateway { dir: tmp.path().to_path_buf() };
        let t0 = Utc::now();
        register_or_heartbeat(&mut gw, "workerA", caps(), t0).unwrap();

        let t1 = t0 + Duration::seconds(60);
        register_or_heartbeat(&mut gw, "workerA", caps(), t1).unwrap();

        let bytes = fs::read(tmp.path().join("nodes").join("workerA")).unwrap();
        let record: NodeRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.last_heartbeat, t1);
    }

    fn caps() -> Capabilities {
        Capabilities {
            cpu_count: 4,
            memory_gb: 16.0,
            disk_gb: 100.0,
        }
    }

    #[test]
    fn new_record_is_active_with_given_heartbeat() {
        let now = Utc::now();
        let rec = NodeRecord::new("workerA", caps(), now);
        assert_eq!(rec.node_id, "workerA");
        assert_eq!(rec.last_heartbeat, now);
        assert_eq!(rec.status, NodeStatusWire::Active);
    }

    #[test]
    fn heartbeat_advances_timestamp() {
        let t0 = Utc::now();
        let mut rec = NodeRecord::new("workerA", caps(), t0);
        let t1 = t0 + Duration::seconds(60);
        rec.heartbeat(t1);
        assert_eq!(rec.last_heartbeat, t1);
    }

    #[test]
    fn heartbeat_never_decreases() {
        let t0 = Utc::now();
        let mut rec = NodeRecord::new("workerA", caps(), t0);
        let earlier = t0 - Duration::seconds(60);
        rec.heartbeat(earlier);
        assert_eq!(rec.last_heartbeat, t0, "heartbeat must not move backwards");
    }

    #[test]
    fn liveness_window_boundary() {
        let t0 = Utc::now();
        let rec = NodeRecord::new("workerA", caps(), t0);
        let window = Duration::minutes(5);
        assert!(rec.is_alive(t0 + Duration::minutes(4), window));
        assert!(!rec.is_alive(t0 + Duration::minutes(6), window));
    }
}
