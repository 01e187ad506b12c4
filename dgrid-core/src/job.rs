//! The job definition and execution record entities, and the in-progress
//! claim filename convention that ties them together.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task priority, used to order the claim scan when priority sub-directories
/// are in use. `Medium` is the default when a job definition omits the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// Scan order for the claim protocol: critical, high, medium, low.
    pub const SCAN_ORDER: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A pending job definition, as stored under `tasks/queue/<task-id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDef {
    pub task_id: String,
    pub script: String,
    pub timeout_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Minimum and maximum allowed `timeout_seconds` on a job definition.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<i64> = 10..=300;

impl JobDef {
    /// Validate the job definition per the filesystem contract. A failure
    /// here is a Task-level error: the caller should report exit code -1
    /// and move the file straight to `failed/` without ever executing it.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.trim().is_empty() {
            return Err("task_id is empty".to_string());
        }
        if self.script.trim().is_empty() {
            return Err("script is empty".to_string());
        }
        if !TIMEOUT_RANGE.contains(&self.timeout_seconds) {
            return Err(format!(
                "timeout_seconds out of range (10-300): {}",
                self.timeout_seconds
            ));
        }
        Ok(())
    }

    pub fn priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

/// Exit classification for a completed or failed sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Timeout,
    Infra,
    Process(i32),
}

impl ExitClass {
    /// The integer stored in the execution record: 0 success, -2 timeout,
    /// -1 infrastructure failure, otherwise the process's own exit code.
    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::Timeout => -2,
            Self::Infra => -1,
            Self::Process(code) => code as i64,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome status recorded alongside an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// The execution record written as `<name>.log` alongside a terminal task
/// file, per the filesystem contract in the external interfaces section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub node_id: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: String,
    pub status: ExecutionStatus,
}

impl ExecutionRecord {
    pub fn new(
        task_id: impl Into<String>,
        node_id: impl Into<String>,
        exit_class: ExitClass,
        stdout: String,
        stderr: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            node_id: node_id.into(),
            exit_code: exit_class.code(),
            stdout: truncate(stdout),
            stderr: truncate(stderr),
            timestamp: timestamp.to_rfc3339(),
            status: if exit_class.is_success() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            },
        }
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > crate::config::OUTPUT_TRUNCATE_BYTES {
        // Truncate on a char boundary at or before the byte limit so we
        // never split a multi-byte UTF-8 sequence.
        let mut cut = crate::config::OUTPUT_TRUNCATE_BYTES;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// The `<node-id>-<task-id>` naming convention for `in_progress/` files.
///
/// The prefix up to the *first* `-` is authoritative; a node id must never
/// contain `-` itself (enforced at config load), so this split is safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimName {
    pub node_id: String,
    pub task_id: String,
}

impl ClaimName {
    pub fn new(node_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            task_id: task_id.into(),
        }
    }

    pub fn to_filename(&self) -> String {
        format!("{}-{}", self.node_id, self.task_id)
    }

    /// Parse a `tasks/in_progress/` filename. Returns `None` for a malformed
    /// name (no `-` separator at all) — callers must skip such files rather
    /// than claim-owning or sweeping them.
    pub fn parse(filename: &str) -> Option<Self> {
        let (node_id, task_id) = filename.split_once('-')?;
        if node_id.is_empty() || task_id.is_empty() {
            return None;
        }
        Some(Self::new(node_id, task_id))
    }
}

impl fmt::Display for ClaimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filename())
    }
}
