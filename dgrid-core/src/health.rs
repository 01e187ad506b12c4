//! Ambient health monitoring: per-hour task rate limiting, resource
//! threshold gating, self-healing, and a git working-copy sanity check.
//!
//! None of this is part of the claim protocol itself — a worker consults
//! [`HealthMonitor::check`] before attempting a claim, and skips the cycle
//! (without treating it as an error) when the grid is unhealthy.

use crate::sandbox::SandboxRunner;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::Path;
use sysinfo::{Disks, System};

/// Why a health check came back unhealthy.
#[derive(Debug, Clone, PartialEq)]
pub enum Unhealthy {
    RateLimited { tasks_this_hour: u64, limit: u64 },
    CpuHigh { percent: f32, limit: f64 },
    MemoryHigh { percent: f32, limit: f64 },
    DiskCritical { percent: f32 },
    GitRepoMissing,
}

impl std::fmt::Display for Unhealthy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { tasks_this_hour, limit } => {
                write!(f, "rate limited: {tasks_this_hour}/{limit} tasks this hour")
            }
            Self::CpuHigh { percent, limit } => write!(f, "cpu at {percent:.1}% exceeds limit {limit:.1}%"),
            Self::MemoryHigh { percent, limit } => {
                write!(f, "memory at {percent:.1}% exceeds limit {limit:.1}%")
            }
            Self::DiskCritical { percent } => write!(f, "disk at {percent:.1}% (critical, >90%)"),
            Self::GitRepoMissing => write!(f, "git repository directory or .git missing"),
        }
    }
}

/// Fixed disk threshold above which self-healing (docker prune) kicks in,
/// distinct from the configurable CPU/memory thresholds.
const DISK_CRITICAL_PERCENT: f32 = 90.0;

pub trait ResourceSampler {
    fn cpu_percent(&mut self) -> f32;
    fn memory_percent(&mut self) -> f32;
    fn disk_percent(&mut self, path: &Path) -> f32;
}

/// `sysinfo`-backed sampler.
pub struct SystemResourceSampler {
    system: System,
}

impl SystemResourceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SystemResourceSampler {
    fn cpu_percent(&mut self) -> f32 {
        self.system.refresh_cpu();
        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    }

    fn memory_percent(&mut self) -> f32 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
    }

    fn disk_percent(&mut self, path: &Path) -> f32 {
        let disks = Disks::new_with_refreshed_list();
        let mut best: Option<(&Path, &sysinfo::Disk)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if path.starts_with(mount) {
                let is_better = match best {
                    Some((m, _)) => mount.components().count() > m.components().count(),
                    None => true,
                };
                if is_better {
                    best = Some((mount, disk));
                }
            }
        }
        match best {
            Some((_, disk)) => {
                let total = disk.total_space();
                if total == 0 {
                    return 0.0;
                }
                let used = total - disk.available_space();
                (used as f64 / total as f64 * 100.0) as f32
            }
            None => 0.0,
        }
    }
}

/// Sliding one-hour window task-rate limiter plus resource threshold gates.
pub struct HealthMonitor<R> {
    sampler: R,
    max_cpu_percent: f64,
    max_memory_percent: f64,
    max_tasks_per_hour: u64,
    task_timestamps: VecDeque<DateTime<Utc>>,
}

impl<R: ResourceSampler> HealthMonitor<R> {
    pub fn new(sampler: R, max_cpu_percent: f64, max_memory_percent: f64, max_tasks_per_hour: u64) -> Self {
        Self {
            sampler,
            max_cpu_percent,
            max_memory_percent,
            max_tasks_per_hour,
            task_timestamps: VecDeque::new(),
        }
    }

    /// Record that a task execution started, for rate limiting purposes.
    pub fn record_task_started(&mut self, at: DateTime<Utc>) {
        self.task_timestamps.push_back(at);
    }

    fn tasks_in_last_hour(&mut self, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::hours(1);
        while matches!(self.task_timestamps.front(), Some(t) if *t < cutoff) {
            self.task_timestamps.pop_front();
        }
        self.task_timestamps.len() as u64
    }

    /// Run every check. `repo_path` is the working copy whose presence and
    /// `.git` directory must exist for the grid to be usable at all.
    pub fn check(&mut self, repo_path: &Path, now: DateTime<Utc>) -> Result<(), Unhealthy> {
        if !repo_path.exists() || !repo_path.join(".git").exists() {
            return Err(Unhealthy::GitRepoMissing);
        }

        if self.max_tasks_per_hour > 0 {
            let count = self.tasks_in_last_hour(now);
            if count >= self.max_tasks_per_hour {
                return Err(Unhealthy::RateLimited {
                    tasks_this_hour: count,
                    limit: self.max_tasks_per_hour,
                });
            }
        }

        let cpu = self.sampler.cpu_percent();
        if cpu as f64 > self.max_cpu_percent {
            return Err(Unhealthy::CpuHigh {
                percent: cpu,
                limit: self.max_cpu_percent,
            });
        }

        let memory = self.sampler.memory_percent();
        if memory as f64 > self.max_memory_percent {
            return Err(Unhealthy::MemoryHigh {
                percent: memory,
                limit: self.max_memory_percent,
            });
        }

        let disk = self.sampler.disk_percent(repo_path);
        if disk > DISK_CRITICAL_PERCENT {
            return Err(Unhealthy::DiskCritical { percent: disk });
        }

        Ok(())
    }

    /// Best-effort recovery when disk pressure is the cause: prune stopped
    /// containers and dangling images via the sandbox runner.
    pub fn self_heal(&mut self, sandbox: &impl SandboxRunner, repo_path: &Path, now: DateTime<Utc>) {
        if let Err(Unhealthy::DiskCritical { .. }) = self.check(repo_path, now) {
            let _ = sandbox.prune();
        }
    }
}
