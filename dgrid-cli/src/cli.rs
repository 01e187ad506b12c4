use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dgrid_core::job::{JobDef, Priority, TIMEOUT_RANGE};
use dgrid_core::status::TaskStatus;
use std::fs;
use std::path::{Path, PathBuf};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("DGRID_GIT_HASH");

#[derive(Parser)]
#[command(
    name = "dgrid",
    version,
    about = "Operator CLI for a D-GRID task-execution grid",
    long_about = "dgrid bootstraps, inspects, and administers a D-GRID repository.\n\nThe running grid itself is driven by the dgrid-worker binary; this CLI is for operators submitting work and checking on it."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the tasks/{queue,in_progress,completed,failed} and nodes/ layout
    Init {
        /// Repository working copy to bootstrap (defaults to ./dgrid-repo)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },

    /// Write a new job definition into tasks/queue/
    Submit {
        /// Task id (becomes the filename under tasks/queue/)
        task_id: String,

        /// Shell script body to run inside the sandbox
        script: String,

        /// Wall-clock timeout in seconds (10-300)
        #[arg(long, default_value_t = 60)]
        timeout: i64,

        /// Priority: critical, high, medium, or low
        #[arg(long)]
        priority: Option<String>,

        /// Repository working copy to submit into (defaults to ./dgrid-repo)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },

    /// Print a count of tasks in each lifecycle directory
    Status {
        /// Repository working copy to inspect (defaults to ./dgrid-repo)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },

    /// Run one orphan-sweep pass: reclaim tasks owned by dead nodes
    Sweep {
        /// Repository working copy to sweep (defaults to ./dgrid-repo)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },

    /// Move a failed task back into tasks/queue/
    Retry {
        /// Task id (filename under tasks/failed/)
        task_id: String,

        /// Repository working copy to retry within (defaults to ./dgrid-repo)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },

    /// Print shell completion scripts for bash, zsh, or fish
    Completions {
        /// Shell type: bash, zsh, or fish
        shell: String,
    },

    /// Print version and build info
    Version,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { repo_path } => cmd_init(&resolve_repo_path(repo_path)),
        Commands::Submit {
            task_id,
            script,
            timeout,
            priority,
            repo_path,
        } => cmd_submit(&resolve_repo_path(repo_path), &task_id, &script, timeout, priority.as_deref()),
        Commands::Status { repo_path } => cmd_status(&resolve_repo_path(repo_path)),
        Commands::Sweep { repo_path } => cmd_sweep(&resolve_repo_path(repo_path)),
        Commands::Retry { task_id, repo_path } => cmd_retry(&resolve_repo_path(repo_path), &task_id),
        Commands::Completions { shell } => cmd_completions(&shell),
        Commands::Version => {
            println!("dgrid {VERSION} ({GIT_HASH})");
            Ok(())
        }
    }
}

fn resolve_repo_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from("./dgrid-repo"))
}

fn cmd_init(repo_path: &Path) -> Result<()> {
    for status in [
        TaskStatus::Queue,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        fs::create_dir_all(repo_path.join("tasks").join(status.dir_name()))
            .with_context(|| format!("creating tasks/{}", status.dir_name()))?;
    }
    fs::create_dir_all(repo_path.join("nodes")).context("creating nodes/")?;
    println!("initialized D-GRID layout at {}", repo_path.display());
    Ok(())
}

fn cmd_submit(
    repo_path: &Path,
    task_id: &str,
    script: &str,
    timeout: i64,
    priority: Option<&str>,
) -> Result<()> {
    if !TIMEOUT_RANGE.contains(&timeout) {
        bail!("timeout must be between {} and {} seconds", TIMEOUT_RANGE.start(), TIMEOUT_RANGE.end());
    }
    let priority = priority
        .map(parse_priority)
        .transpose()?;

    let job = JobDef {
        task_id: task_id.to_string(),
        script: script.to_string(),
        timeout_seconds: timeout,
        priority,
    };
    job.validate().map_err(anyhow::Error::msg)?;

    let queue_dir = repo_path.join("tasks").join("queue");
    fs::create_dir_all(&queue_dir)?;
    let dest = queue_dir.join(task_id);
    if dest.exists() {
        bail!("a queued task named {task_id:?} already exists");
    }
    fs::write(&dest, serde_json::to_vec_pretty(&job)?)?;
    println!("submitted {task_id} to {}", dest.display());
    Ok(())
}

fn parse_priority(s: &str) -> Result<Priority> {
    match s {
        "critical" => Ok(Priority::Critical),
        "high" => Ok(Priority::High),
        "medium" => Ok(Priority::Medium),
        "low" => Ok(Priority::Low),
        other => bail!("unknown priority {other:?} (expected critical, high, medium, or low)"),
    }
}

fn cmd_status(repo_path: &Path) -> Result<()> {
    if !repo_path.join("tasks").exists() {
        bail!("{} has no tasks/ directory — run `dgrid init` first", repo_path.display());
    }
    for status in [
        TaskStatus::Queue,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        let dir = repo_path.join("tasks").join(status.dir_name());
        let count = count_task_files(&dir);
        println!("{:<12} {count}", status.dir_name());
    }
    Ok(())
}

fn count_task_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            !e.file_name()
                .to_str()
                .map(|n| n.ends_with(".log"))
                .unwrap_or(false)
        })
        .count()
}

fn cmd_sweep(repo_path: &Path) -> Result<()> {
    use dgrid_core::config::LIVENESS_WINDOW;
    use dgrid_core::repo_gateway::GitRepoGateway;
    use dgrid_core::sweeper::OrphanSweeper;

    let mut gateway = GitRepoGateway::new(repo_path.to_path_buf(), None);
    let mut sweeper = OrphanSweeper::new(&mut gateway, LIVENESS_WINDOW);
    let reclaimed = sweeper.sweep_once(chrono::Utc::now())?;
    if reclaimed.is_empty() {
        println!("no orphaned tasks found");
    } else {
        for r in &reclaimed {
            println!("reclaimed {} (was owned by {})", r.task_id, r.node_id);
        }
    }
    Ok(())
}

fn cmd_retry(repo_path: &Path, task_id: &str) -> Result<()> {
    let failed_path = repo_path.join("tasks").join("failed").join(task_id);
    if !failed_path.exists() {
        bail!("no failed task named {task_id:?} at {}", failed_path.display());
    }
    let queue_path = repo_path.join("tasks").join("queue").join(task_id);
    if queue_path.exists() {
        bail!("a queued task named {task_id:?} already exists");
    }
    fs::rename(&failed_path, &queue_path)
        .with_context(|| format!("moving {failed_path:?} to {queue_path:?}"))?;
    println!("requeued {task_id}");
    Ok(())
}

fn cmd_completions(shell: &str) -> Result<()> {
    let script = match shell {
        "bash" => crate::completions::BASH,
        "zsh" => crate::completions::ZSH,
        "fish" => crate::completions::FISH,
        other => bail!("unsupported shell {other:?} (expected bash, zsh, or fish)"),
    };
    println!("{script}");
    Ok(())
}
