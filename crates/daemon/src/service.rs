//! Boundary operations of the optimizer, independent of any transport.

use crate::error::{CoreError, CoreResult};
use crate::jobs::HandbrakeJob;
use crate::models::{system_time_ms, DirectoryConfig, HandbrakeSettings, VideoAnalysis};
use crate::probe::{MetadataProbe, ProbeError};
use crate::recommend::SettingsRecommender;
use crate::scheduler::JobScheduler;
use crate::store::{
    AnalysisStore, DirectoryStore, JobStore, MemoryStore, SettingsStore, StoreError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Attempts at claiming the next settings version under contention.
const VERSION_RETRIES: u32 = 5;

/// The four collections the core persists.
#[derive(Clone)]
pub struct Stores {
    pub analyses: Arc<dyn AnalysisStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub jobs: Arc<dyn JobStore>,
    pub directories: Arc<dyn DirectoryStore>,
}

impl Stores {
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            analyses: store.clone(),
            settings: store.clone(),
            jobs: store.clone(),
            directories: store,
        }
    }
}

pub struct OptimizerService {
    stores: Stores,
    probe: Arc<dyn MetadataProbe>,
    recommender: SettingsRecommender,
    scheduler: JobScheduler,
}

impl OptimizerService {
    pub fn new(
        stores: Stores,
        probe: Arc<dyn MetadataProbe>,
        recommender: SettingsRecommender,
        scheduler: JobScheduler,
    ) -> Self {
        Self {
            stores,
            probe,
            recommender,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Probe a file and store its analysis.
    pub async fn ingest(&self, path: &Path) -> CoreResult<VideoAnalysis> {
        if path.as_os_str().is_empty() {
            return Err(CoreError::validation("file path is empty"));
        }
        let meta = std::fs::metadata(path).map_err(|e| {
            CoreError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        if !meta.is_file() {
            return Err(CoreError::validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let modified_ms = meta.modified().ok().map(system_time_ms);

        let probe = Arc::clone(&self.probe);
        let target = path.to_path_buf();
        let probed = tokio::task::spawn_blocking(move || probe.probe(&target))
            .await
            .map_err(|e| ProbeError::FfprobeFailed(format!("probe task failed: {}", e)))??;

        let analysis = probed.into_analysis(path, meta.len(), modified_ms);
        analysis.validate()?;
        self.stores.analyses.insert_analysis(analysis.clone())?;
        info!(
            analysis_id = %analysis.id,
            path = %path.display(),
            resolution = %analysis.resolution,
            codec = %analysis.video_codec,
            "Video analyzed"
        );
        Ok(analysis)
    }

    /// Ingest path used by the directory watcher.
    ///
    /// Follow-up failures (settings, enqueue) are logged; the analysis is
    /// kept so the file is not probed again.
    pub async fn ingest_discovered(
        &self,
        path: &Path,
        auto_analyze: bool,
        auto_enqueue: bool,
    ) -> CoreResult<VideoAnalysis> {
        let analysis = self.ingest(path).await?;

        if auto_enqueue {
            if let Err(e) = self.enqueue_job(&analysis.id) {
                warn!(analysis_id = %analysis.id, error = %e, "Automatic enqueue failed");
            }
        } else if auto_analyze {
            if let Err(e) = self.get_or_compute_settings(&analysis.id) {
                warn!(analysis_id = %analysis.id, error = %e, "Automatic recommendation failed");
            }
        }
        Ok(analysis)
    }

    /// Newest first.
    pub fn list_analyses(&self) -> CoreResult<Vec<VideoAnalysis>> {
        Ok(self.stores.analyses.list_analyses()?)
    }

    pub fn get_analysis(&self, analysis_id: &str) -> CoreResult<VideoAnalysis> {
        Ok(self.stores.analyses.get_analysis(analysis_id)?)
    }

    /// Current recommendation, computed and stored on first request.
    pub fn get_or_compute_settings(&self, analysis_id: &str) -> CoreResult<HandbrakeSettings> {
        let analysis = self.stores.analyses.get_analysis(analysis_id)?;
        if let Some(settings) = self.stores.settings.latest_settings(analysis_id)? {
            return Ok(settings);
        }

        let settings = self.recommender.recommend(&analysis)?;
        match self.stores.settings.insert_settings(settings.clone()) {
            Ok(()) => {
                info!(
                    analysis_id = %analysis_id,
                    settings_id = %settings.id,
                    preset = %settings.preset,
                    encoder = %settings.video_encoder,
                    quality = settings.quality,
                    "Settings recommended"
                );
                Ok(settings)
            }
            // Another caller stored version 1 first.
            Err(StoreError::Conflict(_)) => self
                .stores
                .settings
                .latest_settings(analysis_id)?
                .ok_or_else(|| CoreError::not_found("handbrake_settings", analysis_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Store a fresh recommendation as the next version.
    pub fn recompute_settings(&self, analysis_id: &str) -> CoreResult<HandbrakeSettings> {
        let analysis = self.stores.analyses.get_analysis(analysis_id)?;
        for _ in 0..VERSION_RETRIES {
            let next_version = self
                .stores
                .settings
                .latest_settings(analysis_id)?
                .map_or(1, |s| s.version + 1);

            let mut settings = self.recommender.recommend(&analysis)?;
            settings.version = next_version;
            match self.stores.settings.insert_settings(settings.clone()) {
                Ok(()) => {
                    info!(analysis_id = %analysis_id, version = next_version, "Settings recomputed");
                    return Ok(settings);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::Storage(StoreError::Conflict(format!(
            "could not allocate a settings version for analysis {}",
            analysis_id
        ))))
    }

    /// Queue an encode of the analysed file with its current settings.
    pub fn enqueue_job(&self, analysis_id: &str) -> CoreResult<String> {
        let analysis = self.stores.analyses.get_analysis(analysis_id)?;
        let settings = self.get_or_compute_settings(analysis_id)?;
        let job = self.scheduler.enqueue(
            analysis_id,
            analysis.file_path,
            settings.output_file,
            Some(settings.id),
        )?;
        Ok(job.id)
    }

    pub fn list_jobs(&self) -> CoreResult<Vec<HandbrakeJob>> {
        Ok(self.stores.jobs.list_jobs()?)
    }

    pub fn get_job(&self, job_id: &str) -> CoreResult<HandbrakeJob> {
        self.scheduler.get_status(job_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> CoreResult<HandbrakeJob> {
        self.scheduler.cancel(job_id)
    }

    /// Register a directory for scanning. The path must be an existing
    /// directory and must not already be registered.
    pub fn add_directory(&self, path: PathBuf) -> CoreResult<DirectoryConfig> {
        if !path.is_dir() {
            return Err(CoreError::validation(format!(
                "{} is not an existing directory",
                path.display()
            )));
        }
        let directory = DirectoryConfig::new(path);
        match self.stores.directories.insert_directory(directory.clone()) {
            Ok(()) => {
                info!(path = %directory.path.display(), "Watch directory added");
                Ok(directory)
            }
            Err(StoreError::Conflict(message)) => Err(CoreError::Validation(message)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_directories(&self) -> CoreResult<Vec<DirectoryConfig>> {
        Ok(self.stores.directories.list_directories()?)
    }

    pub fn remove_directory(&self, directory_id: &str) -> CoreResult<DirectoryConfig> {
        let removed = self.stores.directories.remove_directory(directory_id)?;
        info!(path = %removed.path.display(), "Watch directory removed");
        Ok(removed)
    }

    /// Register configured directories, skipping ones already known.
    pub fn seed_directories(&self, paths: &[PathBuf]) -> CoreResult<usize> {
        let known: Vec<PathBuf> = self
            .list_directories()?
            .into_iter()
            .map(|d| d.path)
            .collect();

        let mut added = 0;
        for path in paths.iter().filter(|p| !known.contains(p)) {
            match self.add_directory(path.clone()) {
                Ok(_) => added += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping configured directory"),
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::concurrency::ConcurrencyPlan;
    use crate::encode::HandbrakeCli;
    use crate::probe::ProbedMetadata;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Reports a fixed 4K h264 Matroska file for every path, except `.bad`
    /// files and file names containing "corrupt".
    pub(crate) struct FixedProbe;

    impl MetadataProbe for FixedProbe {
        fn probe(&self, path: &Path) -> Result<ProbedMetadata, ProbeError> {
            if path.extension().and_then(|e| e.to_str()) == Some("bad") {
                return Err(ProbeError::NoVideoStream);
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.contains("corrupt") {
                return Err(ProbeError::ParseError("truncated header".to_string()));
            }
            Ok(ProbedMetadata {
                width: 3840,
                height: 2160,
                duration_secs: 120.0,
                size_bytes: 0,
                video_codec: "h264".to_string(),
                audio_codec: "aac".to_string(),
                video_bitrate: Some(40_000_000),
                audio_bitrate: None,
                frame_rate: Some(24.0),
                aspect_ratio: None,
                container_format: "matroska,webm".to_string(),
            })
        }
    }

    pub(crate) fn plan() -> ConcurrencyPlan {
        ConcurrencyPlan {
            total_cores: 4,
            workers: 1,
            max_attempts: 3,
            job_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(1),
            poll_interval: Duration::from_millis(50),
            progress_flush: Duration::from_millis(100),
        }
    }

    pub(crate) fn service(dir: &TempDir) -> OptimizerService {
        let store = Arc::new(MemoryStore::in_memory());
        let stores = Stores::from_memory(store);
        let scheduler = JobScheduler::new(
            stores.analyses.clone(),
            stores.settings.clone(),
            stores.jobs.clone(),
            Arc::new(HandbrakeCli::default()),
            plan(),
        );
        OptimizerService::new(
            stores,
            Arc::new(FixedProbe),
            SettingsRecommender::new(dir.path().join("out"), "HandBrakeCLI"),
            scheduler,
        )
    }
}
