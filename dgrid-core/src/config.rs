//! Runtime configuration for D-GRID workers and the maintainer sweeper.
//!
//! Resolution order: **hardcoded default < optional config file < env var**.
//! Every setting below follows this order; validation is strict — any
//! violation at startup is fatal (see [`Config::load`]).
//!
//! ```text
//! Field                Env Var               Default
//! ──────────────────── ───────────────────── ────────────────────────
//! repo_url              DGRID_REPO_URL        (required)
//! repo_path             DGRID_REPO_PATH       ./dgrid-repo
//! node_id               NODE_ID               hostname
//! pull_interval         PULL_INTERVAL         10s  (>= 1s)
//! heartbeat_interval    HEARTBEAT_INTERVAL    60s  (>= pull_interval)
//! docker_cpus           DOCKER_CPUS           1
//! docker_memory         DOCKER_MEMORY         512m
//! docker_timeout        DOCKER_TIMEOUT        300s
//! use_shallow_clone     USE_SHALLOW_CLONE     true
//! use_smart_polling     USE_SMART_POLLING     true
//! max_tasks_per_hour    MAX_TASKS_PER_HOUR    0 (unlimited)
//! max_cpu_percent       MAX_CPU_PERCENT       80.0
//! max_memory_percent    MAX_MEMORY_PERCENT    80.0
//! log_level             LOG_LEVEL             info
//! enable_task_signing   ENABLE_TASK_SIGNING   false
//! trusted_keys_file     TRUSTED_KEYS_FILE     (none)
//! git_token             GIT_TOKEN             (none, legacy)
//! ```

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fmt, fs};

/// Liveness window used by the orphan sweeper: a node silent for longer than
/// this is considered dead. Fixed, not configurable — see design notes.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Fixed sandbox image; never derived from task input.
pub const SANDBOX_IMAGE: &str = "python:3.11-alpine";

/// Fixed sandbox process limit.
pub const SANDBOX_PIDS_LIMIT: u32 = 10;

/// Fixed sandbox user.
pub const SANDBOX_USER: &str = "1000:1000";

/// Per-stream output truncation limit in bytes.
pub const OUTPUT_TRUNCATE_BYTES: usize = 10 * 1024;

/// Verbosity filter for worker/sweeper logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "warn" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker/sweeper configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_url: String,
    pub repo_path: PathBuf,
    pub node_id: String,
    pub pull_interval: Duration,
    pub heartbeat_interval: Duration,
    pub docker_cpus: String,
    pub docker_memory: String,
    pub docker_timeout: Duration,
    pub use_shallow_clone: bool,
    pub use_smart_polling: bool,
    pub max_tasks_per_hour: u64,
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub log_level: LogLevel,
    pub enable_task_signing: bool,
    pub trusted_keys_file: Option<PathBuf>,
    pub git_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, an optional
    /// `<repo_path>/.dgrid/config` file, and hardcoded defaults, then
    /// validate strictly. Any violation is a fatal error.
    pub fn load() -> Result<Self> {
        Self::load_with_env(|k| env::var(k).ok())
    }

    fn load_with_env(get_env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let repo_path = get_env("DGRID_REPO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./dgrid-repo"));

        let mut cfg = Self::defaults(&repo_path);

        let config_file = repo_path.join(".dgrid").join("config");
        if config_file.exists() {
            parse_config_file(&config_file, |key, value| {
                cfg.apply_file_entry(key, value);
            })?;
        }

        cfg.apply_env_overrides(&get_env);
        cfg.validate()?;
        Ok(cfg)
    }

    fn defaults(repo_path: &Path) -> Self {
        Self {
            repo_url: String::new(),
            repo_path: repo_path.to_path_buf(),
            node_id: default_node_id(),
            pull_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            docker_cpus: "1".to_string(),
            docker_memory: "512m".to_string(),
            docker_timeout: Duration::from_secs(300),
            use_shallow_clone: true,
            use_smart_polling: true,
            max_tasks_per_hour: 0,
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            log_level: LogLevel::Info,
            enable_task_signing: false,
            trusted_keys_file: None,
            git_token: None,
        }
    }

    fn apply_file_entry(&mut self, key: &str, value: &str) {
        match key {
            "repo_url" => self.repo_url = value.to_string(),
            "node_id" => self.node_id = value.to_string(),
            "pull_interval" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.pull_interval = Duration::from_secs(n);
                }
            }
            "heartbeat_interval" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.heartbeat_interval = Duration::from_secs(n);
                }
            }
            "docker_cpus" => self.docker_cpus = value.to_string(),
            "docker_memory" => self.docker_memory = value.to_string(),
            "docker_timeout" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.docker_timeout = Duration::from_secs(n);
                }
            }
            "use_shallow_clone" => self.use_shallow_clone = value == "true",
            "use_smart_polling" => self.use_smart_polling = value == "true",
            "max_tasks_per_hour" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.max_tasks_per_hour = n;
                }
            }
            "max_cpu_percent" => {
                if let Ok(n) = value.parse::<f64>() {
                    self.max_cpu_percent = n;
                }
            }
            "max_memory_percent" => {
                if let Ok(n) = value.parse::<f64>() {
                    self.max_memory_percent = n;
                }
            }
            "log_level" => {
                if let Some(l) = LogLevel::parse(value) {
                    self.log_level = l;
                }
            }
            "enable_task_signing" => self.enable_task_signing = value == "true",
            "trusted_keys_file" => self.trusted_keys_file = Some(PathBuf::from(value)),
            "git_token" => self.git_token = Some(value.to_string()),
            _ => {}
        }
    }

    fn apply_env_overrides(&mut self, get_env: &impl Fn(&str) -> Option<String>) {
        if let Some(v) = get_env("DGRID_REPO_URL") {
            self.repo_url = v;
        }
        if let Some(v) = get_env("NODE_ID") {
            self.node_id = v;
        }
        if let Some(v) = get_env("PULL_INTERVAL") {
            if let Ok(n) = v.parse::<u64>() {
                self.pull_interval = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("HEARTBEAT_INTERVAL") {
            if let Ok(n) = v.parse::<u64>() {
                self.heartbeat_interval = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("DOCKER_CPUS") {
            self.docker_cpus = v;
        }
        if let Some(v) = get_env("DOCKER_MEMORY") {
            self.docker_memory = v;
        }
        if let Some(v) = get_env("DOCKER_TIMEOUT") {
            if let Ok(n) = v.parse::<u64>() {
                self.docker_timeout = Duration::from_secs(n);
            }
        }
        if let Some(v) = get_env("USE_SHALLOW_CLONE") {
            self.use_shallow_clone = v == "true";
        }
        if let Some(v) = get_env("USE_SMART_POLLING") {
            self.use_smart_polling = v == "true";
        }
        if let Some(v) = get_env("MAX_TASKS_PER_HOUR") {
            if let Ok(n) = v.parse::<u64>() {
                self.max_tasks_per_hour = n;
            }
        }
        if let Some(v) = get_env("MAX_CPU_PERCENT") {
            if let Ok(n) = v.parse::<f64>() {
                self.max_cpu_percent = n;
            }
        }
        if let Some(v) = get_env("MAX_MEMORY_PERCENT") {
            if let Ok(n) = v.parse::<f64>() {
                self.max_memory_percent = n;
            }
        }
        if let Some(v) = get_env("LOG_LEVEL") {
            if let Some(l) = LogLevel::parse(&v) {
                self.log_level = l;
            }
        }
        if let Some(v) = get_env("ENABLE_TASK_SIGNING") {
            self.enable_task_signing = v == "true";
        }
        if let Some(v) = get_env("TRUSTED_KEYS_FILE") {
            self.trusted_keys_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get_env("GIT_TOKEN") {
            if !v.is_empty() {
                self.git_token = Some(v);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            bail!("DGRID_REPO_URL is required");
        }
        if self.node_id.trim().is_empty() {
            bail!("NODE_ID must not be empty");
        }
        if self.node_id.contains('-') {
            bail!(
                "NODE_ID {:?} must not contain '-': the in_progress filename \
                 prefix splits on the first '-' and an id containing one would \
                 be misparsed",
                self.node_id
            );
        }
        if self.pull_interval < Duration::from_secs(1) {
            bail!("PULL_INTERVAL must be >= 1s");
        }
        if self.heartbeat_interval < self.pull_interval {
            bail!("HEARTBEAT_INTERVAL must be >= PULL_INTERVAL");
        }
        if !(0.0..=100.0).contains(&self.max_cpu_percent) {
            bail!("MAX_CPU_PERCENT must be in [0, 100]");
        }
        if !(0.0..=100.0).contains(&self.max_memory_percent) {
            bail!("MAX_MEMORY_PERCENT must be in [0, 100]");
        }
        if self.enable_task_signing && self.trusted_keys_file.is_none() {
            bail!("ENABLE_TASK_SIGNING=true requires TRUSTED_KEYS_FILE");
        }
        Ok(())
    }
}

#[cfg(test)]
impl Config {
    /// Minimal valid configuration for tests in other modules that need a
    /// `Config` but aren't exercising config loading itself.
    pub(crate) fn test_defaults(node_id: &str) -> Self {
        let mut cfg = Self::defaults(Path::new("./dgrid-repo"));
        cfg.repo_url = "https://example/repo.git".to_string();
        cfg.node_id = node_id.to_string();
        cfg
    }
}

fn default_node_id() -> String {
    let hostname = std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    hostname.unwrap_or_else(|| "node".to_string()).replace('-', "_")
}

/// Parse a `key=value` config file, calling `f` for each entry.
///
/// Lines starting with `#` and empty lines are skipped.
fn parse_config_file(path: &Path, mut f: impl FnMut(&str, &str)) -> Result<()> {
    let content = fs::read_to_string(path)?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            f(k.trim(), v.trim());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env_with(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |k: &str| pairs.iter().find(|(key, _)| *key == k).map(|(_, v)| v.to_string())
    }

    #[test]
    fn requires_repo_url() {
        let err = Config::load_with_env(|_| None).unwrap_err();
        assert!(err.to_string().contains("DGRID_REPO_URL"));
    }

    #[test]
    fn defaults_applied_when_only_repo_url_set() {
        let cfg = Config::load_with_env(env_with(&[("DGRID_REPO_URL", "https://example/repo.git")]))
            .unwrap();
        assert_eq!(cfg.pull_interval, Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(cfg.docker_cpus, "1");
        assert_eq!(cfg.docker_memory, "512m");
        assert!(cfg.use_shallow_clone);
        assert!(cfg.use_smart_polling);
        assert_eq!(cfg.max_tasks_per_hour, 0);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert!(!cfg.enable_task_signing);
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = Config::load_with_env(env_with(&[
            ("DGRID_REPO_URL", "https://example/repo.git"),
            ("NODE_ID", "worker1"),
            ("PULL_INTERVAL", "5"),
            ("HEARTBEAT_INTERVAL", "30"),
            ("MAX_TASKS_PER_HOUR", "20"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(cfg.node_id, "worker1");
        assert_eq!(cfg.pull_interval, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_tasks_per_hour, 20);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn heartbeat_must_not_be_shorter_than_pull_interval() {
        let err = Config::load_with_env(env_with(&[
            ("DGRID_REPO_URL", "https://example/repo.git"),
            ("PULL_INTERVAL", "30"),
            ("HEARTBEAT_INTERVAL", "5"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("HEARTBEAT_INTERVAL"));
    }

    #[test]
    fn node_id_with_hyphen_is_rejected() {
        let err = Config::load_with_env(env_with(&[
            ("DGRID_REPO_URL", "https://example/repo.git"),
            ("NODE_ID", "worker-1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("NODE_ID"));
    }

    #[test]
    fn signing_enabled_without_trusted_keys_file_is_rejected() {
        let err = Config::load_with_env(env_with(&[
            ("DGRID_REPO_URL", "https://example/repo.git"),
            ("ENABLE_TASK_SIGNING", "true"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("TRUSTED_KEYS_FILE"));
    }

    #[test]
    fn resource_thresholds_out_of_range_rejected() {
        let err = Config::load_with_env(env_with(&[
            ("DGRID_REPO_URL", "https://example/repo.git"),
            ("MAX_CPU_PERCENT", "150"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_CPU_PERCENT"));
    }

    #[test]
    fn config_file_is_applied_under_repo_path() {
        let dir = TempDir::new().unwrap();
        let dgrid_dir = dir.path().join(".dgrid");
        fs::create_dir_all(&dgrid_dir).unwrap();
        fs::write(
            dgrid_dir.join("config"),
            "# comment\nrepo_url=https://example/from-file.git\nmax_tasks_per_hour=7\n\n",
        )
        .unwrap();

        let repo_path_str: &'static str =
            Box::leak(dir.path().to_string_lossy().into_owned().into_boxed_str());
        let cfg = Config::load_with_env(move |k| match k {
            "DGRID_REPO_PATH" => Some(repo_path_str.to_string()),
            _ => None,
        });
        let cfg = cfg.unwrap();
        assert_eq!(cfg.repo_url, "https://example/from-file.git");
        assert_eq!(cfg.max_tasks_per_hour, 7);
    }

    #[test]
    fn env_wins_over_file() {
        let dir = TempDir::new().unwrap();
        let dgrid_dir = dir.path().join(".dgrid");
        fs::create_dir_all(&dgrid_dir).unwrap();
        fs::write(
            dgrid_dir.join("config"),
            "repo_url=https://example/from-file.git\n",
        )
        .unwrap();

        let repo_path_str: &'static str =
            Box::leak(dir.path().to_string_lossy().into_owned().into_boxed_str());
        let cfg = Config::load_with_env(move |k| match k {
            "DGRID_REPO_PATH" => Some(repo_path_str.to_string()),
            "DGRID_REPO_URL" => Some("https://example/from-env.git".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.repo_url, "https://example/from-env.git");
    }

    #[test]
    fn unknown_keys_and_invalid_numbers_ignored() {
        let dir = TempDir::new().unwrap();
        let dgrid_dir = dir.path().join(".dgrid");
        fs::create_dir_all(&dgrid_dir).unwrap();
        fs::write(
            dgrid_dir.join("config"),
            "repo_url=https://example/repo.git\nunknown_key=x\npull_interval=not_a_number\n",
        )
        .unwrap();

        let repo_path_str: &'static str =
            Box::leak(dir.path().to_string_lossy().into_owned().into_boxed_str());
        let cfg = Config::load_with_env(move |k| match k {
            "DGRID_REPO_PATH" => Some(repo_path_str.to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.pull_interval, Duration::from_secs(10));
    }

    #[test]
    fn log_level_parse_and_display() {
        for l in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug] {
            assert_eq!(LogLevel::parse(&l.to_string()), Some(l));
        }
        assert_eq!(LogLevel::parse("verbose"), None);
    }
}
