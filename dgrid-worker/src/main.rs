//! Long-running D-GRID worker: clones/opens the grid repository, registers
//! this node, then loops pull -> claim -> execute -> report on
//! `PULL_INTERVAL`, heartbeating on `HEARTBEAT_INTERVAL` and yielding to the
//! health monitor when the grid or this host is unhealthy.
//!
//! Pass `--force` to steal the working-copy lock from a dead-looking prior
//! instance.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use dgrid_core::config::Config;
use dgrid_core::engine::{CycleOutcome, TaskEngine};
use dgrid_core::error::GridError;
use dgrid_core::health::{HealthMonitor, SystemResourceSampler, Unhealthy};
use dgrid_core::lock::WorkerLock;
use dgrid_core::logging;
use dgrid_core::node::{self, Capabilities};
use dgrid_core::repo_gateway::{GitRepoGateway, RepoGateway};
use dgrid_core::sandbox::DockerSandboxRunner;
use dgrid_core::signing::{NoSigning, TaskSigner, TrustedKeySigner};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("dgrid-worker: {}", GridError::fatal("loading configuration", e));
            std::process::exit(1);
        }
    };

    match run(&config) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            logging::error(config.log_level, &format!("{e:#}"));
            std::process::exit(1);
        }
    }
}

fn run(config: &Config) -> Result<()> {
    let force = std::env::args().any(|a| a == "--force");
    let _lock = WorkerLock::acquire(&config.repo_path, force)
        .map_err(|e| GridError::fatal("acquiring working-copy lock", e))?;

    let mut gateway = GitRepoGateway::new(&config.repo_path, config.git_token.clone());
    gateway
        .open_or_clone(&config.repo_url, config.use_shallow_clone)
        .map_err(|e| GridError::fatal("opening or cloning the grid repository", e))?;

    let signer = build_signer(config)?;
    let sandbox = DockerSandboxRunner::new(config);
    let caps = Capabilities::detect(&config.repo_path);

    let mut now = Utc::now();
    node::register_or_heartbeat(&mut gateway, &config.node_id, caps, now)
        .map_err(|e| GridError::fatal("registering node", e))?;
    let mut last_heartbeat = now;

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [SIGTERM, SIGINT] {
        if let Err(e) = flag::register(sig, Arc::clone(&shutdown)) {
            logging::warn(config.log_level, &format!("failed to register signal handler: {e}"));
        }
    }

    let mut health = HealthMonitor::new(
        SystemResourceSampler::new(),
        config.max_cpu_percent,
        config.max_memory_percent,
        config.max_tasks_per_hour,
    );

    logging::info(
        config.log_level,
        &format!("dgrid-worker started for node {}", config.node_id),
    );

    while !shutdown.load(Ordering::Relaxed) {
        now = Utc::now();

        match health.check(&config.repo_path, now) {
            Ok(()) => run_tick(config, &mut gateway, &sandbox, signer.as_ref(), &mut health, now),
            Err(Unhealthy::DiskCritical { percent }) => {
                logging::warn(
                    config.log_level,
                    &format!("disk at {percent:.1}% (critical), attempting self-heal"),
                );
                health.self_heal(&sandbox, &config.repo_path, now);
            }
            Err(reason) => {
                logging::warn(config.log_level, &format!("skipping tick: {reason}"));
            }
        }

        if now.signed_duration_since(last_heartbeat).to_std().unwrap_or_default() >= config.heartbeat_interval {
            match node::register_or_heartbeat(&mut gateway, &config.node_id, caps, now) {
                Ok(()) => last_heartbeat = now,
                Err(e) => logging::warn(config.log_level, &format!("heartbeat failed: {e:#}")),
            }
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(config.pull_interval);
    }

    logging::info(config.log_level, "shutdown signal received, emitting final heartbeat");
    node::register_or_heartbeat(&mut gateway, &config.node_id, caps, Utc::now())
        .context("final heartbeat before shutdown")?;
    Ok(())
}

fn run_tick(
    config: &Config,
    gateway: &mut GitRepoGateway,
    sandbox: &DockerSandboxRunner,
    signer: &dyn TaskSigner,
    health: &mut HealthMonitor<SystemResourceSampler>,
    now: chrono::DateTime<Utc>,
) {
    let mut engine = TaskEngine::new(config, gateway, sandbox, signer);
    match engine.run_once(now) {
        Ok(CycleOutcome::Idle) => logging::debug(config.log_level, "tick: idle"),
        Ok(CycleOutcome::Executed { task_id, exit_code }) => {
            health.record_task_started(now);
            logging::info(config.log_level, &format!("executed {task_id} (exit {exit_code})"));
        }
        Ok(CycleOutcome::ReportDegraded { task_id }) => {
            logging::warn(
                config.log_level,
                &format!("lost the report push race for {task_id}; reset to remote"),
            );
        }
        Err(e) => {
            logging::warn(config.log_level, &format!("tick failed, resetting to remote: {e:#}"));
            let _ = gateway.reset_to_remote();
        }
    }
}

fn build_signer(config: &Config) -> Result<Box<dyn TaskSigner>> {
    if !config.enable_task_signing {
        return Ok(Box::new(NoSigning));
    }
    let Some(keys_file) = config.trusted_keys_file.as_deref() else {
        bail!("ENABLE_TASK_SIGNING is set but no TRUSTED_KEYS_FILE (config validation should have caught this)");
    };
    let signer = TrustedKeySigner::gpg(keys_file).context("loading trusted keys file")?;
    logging::info(
        config.log_level,
        &format!("task signing enabled with {} trusted key(s)", signer.trusted_key_count()),
    );
    Ok(Box::new(signer))
}
