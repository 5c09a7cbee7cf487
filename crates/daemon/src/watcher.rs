//! Directory watcher for discovering new source videos.
//!
//! Each tick walks every monitored directory, and files whose dedup key
//! `(path, mtime, size)` has not been seen go through the normal ingest
//! path. A failure for one file is logged and the file is retried on the
//! next tick; the rest of the scan carries on.

use crate::config::WatcherConfig;
use crate::error::CoreResult;
use crate::models::system_time_ms;
use crate::service::OptimizerService;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Video file extensions recognized by the watcher (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "m4v", "ts", "m2ts", "webm", "wmv", "flv", "mpg", "mpeg",
];

/// Identity of one version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub path: PathBuf,
    pub modified_ms: i64,
    pub size_bytes: u64,
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Walk `root` for video files old enough to be complete.
///
/// Hidden directories and anything under `excluded` are skipped. Entries
/// that cannot be read are logged and left out.
pub fn scan_directory(
    root: &Path,
    excluded: &[PathBuf],
    min_file_age: Duration,
    now: SystemTime,
) -> Vec<DedupKey> {
    let mut candidates = Vec::new();
    if !root.is_dir() {
        warn!(path = %root.display(), "Watch directory is missing");
        return candidates;
    }

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        if entry.file_type().is_dir() {
            let hidden = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return false;
            }
        }
        !excluded.iter().any(|ex| entry.path().starts_with(ex))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_video_file(entry.path()) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Cannot stat file");
                continue;
            }
        };
        let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        // Probably still being written.
        let age = now.duration_since(modified_time).unwrap_or(Duration::ZERO);
        if age < min_file_age {
            debug!(path = %entry.path().display(), "File too new, deferring");
            continue;
        }

        candidates.push(DedupKey {
            path: entry.path().to_path_buf(),
            modified_ms: system_time_ms(modified_time),
            size_bytes: metadata.len(),
        });
    }

    candidates
}

/// Totals for one scan tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub ingested: usize,
    pub already_seen: usize,
    pub failed: usize,
}

/// Periodic scanner feeding the ingest path.
pub struct DirectoryWatcher {
    service: Arc<OptimizerService>,
    scan_interval: Duration,
    min_file_age: Duration,
    auto_enqueue: bool,
    excluded: Vec<PathBuf>,
    seen: HashSet<DedupKey>,
}

impl DirectoryWatcher {
    /// `excluded` paths (e.g. the encoder output directory) are never scanned.
    pub fn new(service: Arc<OptimizerService>, cfg: &WatcherConfig, excluded: Vec<PathBuf>) -> Self {
        Self {
            service,
            scan_interval: Duration::from_secs(cfg.scan_interval_secs.max(1)),
            min_file_age: Duration::from_secs(cfg.min_file_age_secs),
            auto_enqueue: cfg.auto_enqueue,
            excluded,
            seen: HashSet::new(),
        }
    }

    /// Mark every already-analysed file version as seen.
    pub fn seed_from_store(&mut self) -> CoreResult<usize> {
        let before = self.seen.len();
        for analysis in self.service.list_analyses()? {
            if let Some(modified_ms) = analysis.source_modified_ms {
                self.seen.insert(DedupKey {
                    path: analysis.file_path,
                    modified_ms,
                    size_bytes: analysis.file_size,
                });
            }
        }
        Ok(self.seen.len() - before)
    }

    /// Scan all monitored directories once.
    pub async fn scan_once(&mut self) -> CoreResult<ScanSummary> {
        let mut summary = ScanSummary::default();
        let directories = self.service.list_directories()?;

        for directory in directories.into_iter().filter(|d| d.monitor_enabled) {
            let root = directory.path.clone();
            let excluded = self.excluded.clone();
            let min_age = self.min_file_age;
            let candidates = match tokio::task::spawn_blocking(move || {
                scan_directory(&root, &excluded, min_age, SystemTime::now())
            })
            .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(path = %directory.path.display(), error = %e, "Scan task failed");
                    continue;
                }
            };

            for candidate in candidates {
                if self.seen.contains(&candidate) {
                    summary.already_seen += 1;
                    continue;
                }

                match self
                    .service
                    .ingest_discovered(&candidate.path, directory.auto_analyze, self.auto_enqueue)
                    .await
                {
                    Ok(analysis) => {
                        debug!(analysis_id = %analysis.id, path = %candidate.path.display(), "Ingested new file");
                        self.seen.insert(candidate);
                        summary.ingested += 1;
                    }
                    Err(e) => {
                        warn!(path = %candidate.path.display(), error = %e, "Ingest failed, will retry next scan");
                        summary.failed += 1;
                    }
                }
            }
        }

        if summary.ingested > 0 || summary.failed > 0 {
            info!(
                ingested = summary.ingested,
                failed = summary.failed,
                "Directory scan finished"
            );
        }
        Ok(summary)
    }

    /// Scan every `scan_interval` until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        match self.seed_from_store() {
            Ok(seeded) => info!(seeded, "Directory watcher started"),
            Err(e) => warn!(error = %e, "Could not seed watcher from stored analyses"),
        }

        let mut ticker = tokio::time::interval(self.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "Directory scan failed");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Directory watcher stopped");
    }
}
