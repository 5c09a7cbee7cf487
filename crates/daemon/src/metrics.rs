//! Metrics module for the optimizer daemon
//!
//! Periodically snapshots queue state and host load into a shared
//! [`MetricsSnapshot`] served as JSON by the metrics endpoint.

use crate::jobs::{HandbrakeJob, JobStatus};
use crate::models::current_timestamp_ms;
use crate::service::OptimizerService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-job view of a running encode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub video_analysis_id: String,
    pub input_path: String,
    pub output_path: String,
    pub status: JobStatus,
    pub progress: f64,
    pub attempts: u32,
    pub started_at: Option<i64>,
}

impl From<&HandbrakeJob> for JobMetrics {
    fn from(job: &HandbrakeJob) -> Self {
        Self {
            id: job.id.clone(),
            video_analysis_id: job.video_analysis_id.clone(),
            input_path: job.input_file.display().to_string(),
            output_path: job.output_file.display().to_string(),
            status: job.status,
            progress: job.progress,
            attempts: job.attempts,
            started_at: job.started_at,
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including running jobs, queue counts and host load
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub system: SystemMetrics,
    pub workers: u32,
    pub busy_workers: usize,
    pub queue_len: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub analyses: usize,
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

/// Build a snapshot from the current job table.
///
/// `jobs` lists only running jobs, oldest start first.
pub fn build_snapshot(
    all_jobs: &[HandbrakeJob],
    analyses: usize,
    workers: u32,
    busy_workers: usize,
    system: SystemMetrics,
) -> MetricsSnapshot {
    let mut snapshot = MetricsSnapshot {
        timestamp_unix_ms: current_timestamp_ms(),
        system,
        workers,
        busy_workers,
        analyses,
        ..MetricsSnapshot::default()
    };

    let mut running: Vec<&HandbrakeJob> = Vec::new();
    for job in all_jobs {
        match job.status {
            JobStatus::Queued => snapshot.queue_len += 1,
            JobStatus::Running => running.push(job),
            JobStatus::Completed => snapshot.completed_jobs += 1,
            JobStatus::Failed => snapshot.failed_jobs += 1,
        }
    }
    running.sort_by_key(|job| (job.started_at, job.id.clone()));
    snapshot.running_jobs = running.len();
    snapshot.jobs = running.into_iter().map(JobMetrics::from).collect();
    snapshot
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics(sys: &mut sysinfo::System) -> SystemMetrics {
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = sysinfo::System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

/// Refresh `metrics` every `interval` until `shutdown` fires.
pub async fn run_metrics_collector(
    service: Arc<OptimizerService>,
    metrics: SharedMetrics,
    interval: Duration,
    shutdown: CancellationToken,
) {
    // CPU usage needs two refreshes spaced apart; keep one System around.
    let mut sys = sysinfo::System::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        let jobs = match service.list_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Metrics refresh skipped");
                continue;
            }
        };
        let analyses = service.list_analyses().map(|a| a.len()).unwrap_or(0);
        let scheduler = service.scheduler();
        let snapshot = build_snapshot(
            &jobs,
            analyses,
            scheduler.plan().workers,
            scheduler.busy_workers(),
            collect_system_metrics(&mut sys),
        );
        *metrics.write().await = snapshot;
    }
}
