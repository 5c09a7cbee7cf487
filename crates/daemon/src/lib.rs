//! HandBrake optimizer daemon
//!
//! Probes source videos, recommends HandBrake settings for them, and runs
//! HandBrakeCLI jobs on a bounded worker pool. A directory watcher feeds new
//! files in; a small HTTP endpoint exposes queue and host metrics.

pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod metrics_server;
pub mod models;
pub mod probe;
pub mod recommend;
pub mod scheduler;
pub mod service;
pub mod startup;
pub mod store;
pub mod watcher;

pub use handbrake_optimizer_config as config;
pub use handbrake_optimizer_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{build_service, load_config, Daemon, DaemonError};
pub use encode::{EncodeError, EncodeRequest, EncoderAdapter, FailureKind, HandbrakeCli};
pub use error::{CoreError, CoreResult};
pub use jobs::{HandbrakeJob, JobStatus};
pub use metrics::{
    build_snapshot, collect_system_metrics, new_shared_metrics, JobMetrics, MetricsSnapshot,
    SharedMetrics, SystemMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use models::{DirectoryConfig, HandbrakeSettings, Resolution, VideoAnalysis};
pub use probe::{FfprobeProbe, MetadataProbe, ProbeError};
pub use recommend::{SettingsRecommender, Tier};
pub use scheduler::JobScheduler;
pub use service::{OptimizerService, Stores};
pub use startup::{run_startup_checks, StartupError, StartupReport};
pub use store::{MemoryStore, StoreError};
pub use watcher::{DirectoryWatcher, ScanSummary};
