//! Daemon startup and main loop
//!
//! Wires configuration, stores, the encoder adapter, the scheduler, the
//! directory watcher and the metrics endpoint together, then runs until
//! asked to stop.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::encode::HandbrakeCli;
use crate::error::CoreError;
use crate::metrics::{new_shared_metrics, run_metrics_collector, SharedMetrics};
use crate::metrics_server::run_metrics_server;
use crate::probe::FfprobeProbe;
use crate::recommend::SettingsRecommender;
use crate::scheduler::JobScheduler;
use crate::service::{OptimizerService, Stores};
use crate::startup::{run_startup_checks, StartupError};
use crate::store::{MemoryStore, StoreError};
use crate::watcher::DirectoryWatcher;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Host metrics refresh period.
const METRICS_REFRESH: Duration = Duration::from_secs(2);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// State directory could not be opened
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A boundary operation failed during start-up
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Waiting for shutdown signal failed
    #[error("Signal error: {0}")]
    Signal(#[from] std::io::Error),
}

/// Build the service graph described by `config`.
pub fn build_service(config: &Config, plan: ConcurrencyPlan) -> Result<OptimizerService, DaemonError> {
    let store = Arc::new(MemoryStore::from_config(config.storage.state_dir.as_deref())?);
    let stores = Stores::from_memory(store);

    let scheduler = JobScheduler::new(
        stores.analyses.clone(),
        stores.settings.clone(),
        stores.jobs.clone(),
        Arc::new(HandbrakeCli::new(config.encoder.handbrake_path.clone())),
        plan,
    );

    Ok(OptimizerService::new(
        stores,
        Arc::new(FfprobeProbe::new(config.encoder.ffprobe_path.clone())),
        SettingsRecommender::new(
            config.encoder.output_dir.clone(),
            config.encoder.handbrake_path.clone(),
        ),
        scheduler,
    ))
}

/// Read `path`, or start from defaults, then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    service: Arc<OptimizerService>,
    metrics: SharedMetrics,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Load `config_path` (defaults when `None`) plus environment overrides,
    /// run the startup checks unless `skip_checks`, and build the daemon.
    pub fn new(config_path: Option<&Path>, skip_checks: bool) -> Result<Self, DaemonError> {
        let config = load_config(config_path)?;
        if skip_checks {
            warn!("Startup checks skipped");
            Self::new_without_checks(config)
        } else {
            Self::with_config(config)
        }
    }

    /// Build from an already loaded configuration after the startup checks pass.
    pub fn with_config(config: Config) -> Result<Self, DaemonError> {
        run_startup_checks(&config)?;
        Self::new_without_checks(config)
    }

    /// Build without running startup checks
    ///
    /// Useful for testing when HandBrakeCLI or ffprobe are not installed.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        let concurrency_plan = derive_plan(&config);
        info!(
            cores = concurrency_plan.total_cores,
            workers = concurrency_plan.workers,
            max_attempts = concurrency_plan.max_attempts,
            "Concurrency plan derived"
        );
        let service = Arc::new(build_service(&config, concurrency_plan.clone())?);

        Ok(Self {
            config,
            concurrency_plan,
            service,
            metrics: new_shared_metrics(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn service(&self) -> Arc<OptimizerService> {
        self.service.clone()
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Token that stops [`Daemon::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the scheduler, watcher and metrics tasks until shutdown.
    ///
    /// On shutdown the scheduler stops dispatching. Encodes still running
    /// are killed when the runtime exits; with a state directory they are
    /// recorded as interrupted on the next start.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let seeded = self.service.seed_directories(&self.config.watcher.directories)?;
        if seeded > 0 {
            info!(seeded, "Configured watch directories added");
        }

        let scheduler = self.service.scheduler().clone();
        let scheduler_handle = scheduler.start();
        let mut background = Vec::new();

        if self.config.watcher.enabled {
            let mut excluded = vec![self.config.encoder.output_dir.clone()];
            if let Some(state_dir) = &self.config.storage.state_dir {
                excluded.push(state_dir.clone());
            }
            let watcher = DirectoryWatcher::new(self.service.clone(), &self.config.watcher, excluded);
            background.push(tokio::spawn(watcher.run(self.shutdown.clone())));
        }

        if self.config.metrics.enabled {
            background.push(tokio::spawn(run_metrics_collector(
                self.service.clone(),
                self.metrics.clone(),
                METRICS_REFRESH,
                self.shutdown.clone(),
            )));

            let metrics = self.metrics.clone();
            let bind = self.config.metrics.bind.clone();
            let shutdown = self.shutdown.clone();
            background.push(tokio::spawn(async move {
                if let Err(e) = run_metrics_server(metrics, &bind, shutdown).await {
                    error!(bind = %bind, error = %e, "Metrics server error");
                }
            }));
        }

        info!("Daemon running");
        self.shutdown.cancelled().await;
        info!("Shutting down");

        scheduler.shutdown();
        if let Err(e) = scheduler_handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
        for handle in background {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Daemon stopped");
        Ok(())
    }

    /// Run until Ctrl-C.
    pub async fn run_until_ctrl_c(&self) -> Result<(), DaemonError> {
        let shutdown = self.shutdown.clone();
        let signal = tokio::spawn(async move {
            let result = tokio::signal::ctrl_c().await;
            shutdown.cancel();
            result
        });

        self.run().await?;
        signal.abort();
        match signal.await {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(error = %e, "Signal task ended abnormally"),
        }
        Ok(())
    }
}
