//! Concurrency planning module
//!
//! Derives the worker-pool size and per-job limits from the CPU core count
//! and configuration.

use crate::config::Config;
use std::time::Duration;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of jobs running at once (W)
    pub workers: u32,
    /// Encode attempts per job before a transient failure becomes final
    pub max_attempts: u32,
    /// Wall-clock budget for one attempt
    pub job_timeout: Duration,
    /// How long a cancelled encoder may take to stop on its own
    pub cancel_grace: Duration,
    /// Dispatch loop and cancel-flag poll interval
    pub poll_interval: Duration,
    /// Minimum spacing of progress writes for one job
    pub progress_flush: Duration,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Derives workers: 2, or 1 on hosts with fewer than 4 cores (unless explicit)
    /// - Zero attempts and zero durations are raised to the smallest usable value
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .cpu
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let workers = if cfg.scheduler.workers > 0 {
            cfg.scheduler.workers
        } else {
            derive_workers(total_cores)
        };

        Self {
            total_cores,
            workers,
            max_attempts: cfg.scheduler.max_attempts.max(1),
            job_timeout: Duration::from_secs(cfg.scheduler.job_timeout_secs.max(1)),
            cancel_grace: Duration::from_secs(cfg.scheduler.cancel_grace_secs),
            poll_interval: Duration::from_millis(cfg.scheduler.poll_interval_ms.max(10)),
            progress_flush: Duration::from_millis(cfg.scheduler.progress_flush_ms),
        }
    }
}

/// Derive worker count based on core count
/// - 1 worker below 4 cores
/// - 2 workers otherwise
fn derive_workers(cores: u32) -> u32 {
    if cores < 4 {
        1
    } else {
        2
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
