//! Core library for D-GRID: a decentralized task-execution grid coordinated
//! entirely through a shared git repository. No broker, no RPC — a
//! fast-forward-only push is the grid's compare-and-swap primitive.
//!
//! This crate has no binary of its own. `dgrid-worker` embeds [`engine`]
//! and [`sweeper`] into the long-running worker process; `dgrid-cli` embeds
//! [`job`] and [`status`] into the operator-facing commands.

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod job;
pub mod lock;
pub mod logging;
pub mod node;
pub mod repo_gateway;
pub mod sandbox;
pub mod signing;
pub mod status;
pub mod sweeper;

pub use config::{Config, LogLevel, LIVENESS_WINDOW};
pub use engine::{CycleOutcome, TaskEngine};
pub use error::{ErrorKind, GridError};
pub use health::{HealthMonitor, SystemResourceSampler, Unhealthy};
pub use job::{ClaimName, ExecutionRecord, ExitClass, JobDef, Priority};
pub use lock::WorkerLock;
pub use node::{Capabilities, NodeRecord};
pub use repo_gateway::{GitRepoGateway, PushOutcome, RepoGateway};
pub use sandbox::{DockerSandboxRunner, RunOutput, SandboxRunner};
pub use signing::{NoSigning, TaskSigner, TrustedKeySigner};
pub use status::TaskStatus;
pub use sweeper::{OrphanSweeper, Reclaimed};
