//! Error classification for the worker's main loop.
//!
//! The engine never lets a raw error escape the loop. Every fallible step is
//! classified into one of four kinds so the loop knows exactly what to do
//! next: retry, abandon-and-reset, fail-the-task, or exit the process.

use std::fmt;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network blip on fetch/push, non-fast-forward push. Retry with backoff;
    /// reset to remote and continue if retries are exhausted.
    Transient,
    /// Claimed task vanished mid-transaction, stale local index. Abandon the
    /// transaction, reset to remote, try again next tick.
    Recoverable,
    /// Malformed task JSON, invalid timeout, unsigned/untrusted task. Reported
    /// as exit code -1 and moved to `failed/`; the loop itself is unaffected.
    TaskLevel,
    /// Config invalid at startup, initial clone fails, working tree corrupt.
    /// Logged, then the process exits non-zero.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Recoverable => "recoverable",
            Self::TaskLevel => "task-level",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carrying enough context to log a single actionable line and to
/// drive the loop's recovery branch.
#[derive(Debug)]
pub struct GridError {
    pub kind: ErrorKind,
    pub context: String,
    pub source: anyhow::Error,
}

impl GridError {
    pub fn transient(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Transient,
            context: context.into(),
            source,
        }
    }

    pub fn recoverable(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Recoverable,
            context: context.into(),
            source,
        }
    }

    pub fn task_level(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::TaskLevel,
            context: context.into(),
            source,
        }
    }

    pub fn fatal(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            context: context.into(),
            source,
        }
    }
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.context, self.source)
    }
}

impl std::error::Error for GridError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}
