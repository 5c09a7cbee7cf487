//! In-memory store with optional JSON-file persistence.
//!
//! With a state directory every record lives in
//! `<state_dir>/<collection>/<id>.json`. The file is written before the
//! in-memory table changes, so a failed write leaves no trace.

use super::{
    AnalysisStore, DirectoryStore, JobStore, SettingsStore, StoreError, StoreResult, Transition,
};
use crate::jobs::{HandbrakeJob, JobStatus, JobUpdate};
use crate::models::{current_timestamp_ms, DirectoryConfig, HandbrakeSettings, VideoAnalysis};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

const ANALYSES: &str = "video_analyses";
const SETTINGS: &str = "handbrake_settings";
const JOBS: &str = "handbrake_jobs";
const DIRECTORIES: &str = "directory_configs";

/// Message recorded on jobs that were running when the process died.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: daemon restarted while job was running";

type Table<T> = RwLock<HashMap<String, T>>;

/// `RwLock`-guarded tables, optionally mirrored to disk.
///
/// Job updates are serialized per job id, so the jobs table lock is only
/// held while the committed record is swapped in, never across file I/O.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state_dir: Option<PathBuf>,
    analyses: Table<VideoAnalysis>,
    settings: Table<HandbrakeSettings>,
    jobs: Table<HandbrakeJob>,
    job_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    directories: Table<DirectoryConfig>,
}

fn read<T>(table: &Table<T>) -> StoreResult<RwLockReadGuard<'_, HashMap<String, T>>> {
    table
        .read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn write<T>(table: &Table<T>) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, T>>> {
    table
        .write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

/// Saves a record as pretty JSON, replacing any previous version.
fn save_record<T: Serialize>(
    state_dir: &Path,
    collection: &str,
    id: &str,
    record: &T,
) -> StoreResult<()> {
    let dir = state_dir.join(collection);
    fs::create_dir_all(&dir)?;

    let json = serde_json::to_string_pretty(record)?;
    let tmp = dir.join(format!(".{}.json.tmp", id));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, dir.join(format!("{}.json", id)))?;
    Ok(())
}

fn delete_record(state_dir: &Path, collection: &str, id: &str) -> StoreResult<()> {
    match fs::remove_file(state_dir.join(collection).join(format!("{}.json", id))) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Loads every record of a collection, skipping files that fail to parse.
fn load_records<T: DeserializeOwned>(state_dir: &Path, collection: &str) -> StoreResult<Vec<T>> {
    let dir = state_dir.join(collection);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let parsed = fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(StoreError::from));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }
    Ok(records)
}

impl MemoryStore {
    /// A store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store backed by `state_dir`, loading existing records.
    ///
    /// Jobs found `running` are failed: their worker died with the previous
    /// process.
    pub fn open(state_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        let now = current_timestamp_ms();

        let analyses: Vec<VideoAnalysis> = load_records(&state_dir, ANALYSES)?;
        let settings: Vec<HandbrakeSettings> = load_records(&state_dir, SETTINGS)?;
        let directories: Vec<DirectoryConfig> = load_records(&state_dir, DIRECTORIES)?;
        let mut jobs: Vec<HandbrakeJob> = load_records(&state_dir, JOBS)?;

        for job in jobs.iter_mut() {
            if job.fail_orphaned(INTERRUPTED_MESSAGE, now) {
                warn!(job_id = %job.id, "Job was running at shutdown, marking failed");
                save_record(&state_dir, JOBS, &job.id, &*job)?;
            }
        }

        info!(
            state_dir = %state_dir.display(),
            analyses = analyses.len(),
            settings = settings.len(),
            jobs = jobs.len(),
            directories = directories.len(),
            "Loaded persisted state"
        );

        Ok(Self {
            analyses: RwLock::new(analyses.into_iter().map(|r| (r.id.clone(), r)).collect()),
            settings: RwLock::new(settings.into_iter().map(|r| (r.id.clone(), r)).collect()),
            jobs: RwLock::new(jobs.into_iter().map(|r| (r.id.clone(), r)).collect()),
            job_locks: Mutex::default(),
            directories: RwLock::new(
                directories
                    .into_iter()
                    .map(|r| (r.id.clone(), r))
                    .collect(),
            ),
            state_dir: Some(state_dir),
        })
    }

    /// Open `state_dir` when given, otherwise an in-memory store.
    pub fn from_config(state_dir: Option<&Path>) -> StoreResult<Self> {
        match state_dir {
            Some(dir) => Self::open(dir),
            None => Ok(Self::in_memory()),
        }
    }

    /// Per-job update lock, created on first use.
    fn job_lock(&self, id: &str) -> StoreResult<Arc<Mutex<()>>> {
        let mut locks = self
            .job_locks
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(locks.entry(id.to_string()).or_default().clone())
    }

    fn commit_job(&self, job: HandbrakeJob) -> StoreResult<()> {
        write(&self.jobs)?.insert(job.id.clone(), job);
        Ok(())
    }

    fn persist<T: Serialize>(&self, collection: &str, id: &str, record: &T) -> StoreResult<()> {
        match &self.state_dir {
            Some(dir) => save_record(dir, collection, id, record),
            None => Ok(()),
        }
    }
}

impl AnalysisStore for MemoryStore {
    fn insert_analysis(&self, analysis: VideoAnalysis) -> StoreResult<()> {
        let mut table = write(&self.analyses)?;
        if table.contains_key(&analysis.id) {
            return Err(StoreError::Conflict(format!(
                "analysis {} already exists",
                analysis.id
            )));
        }
        self.persist(ANALYSES, &analysis.id, &analysis)?;
        table.insert(analysis.id.clone(), analysis);
        Ok(())
    }

    fn get_analysis(&self, id: &str) -> StoreResult<VideoAnalysis> {
        read(&self.analyses)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("video_analysis", id))
    }

    fn list_analyses(&self) -> StoreResult<Vec<VideoAnalysis>> {
        let mut all: Vec<VideoAnalysis> = read(&self.analyses)?.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn find_analyses_by_filename(&self, filename: &str) -> StoreResult<Vec<VideoAnalysis>> {
        let mut found: Vec<VideoAnalysis> = read(&self.analyses)?
            .values()
            .filter(|a| a.filename == filename)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

impl SettingsStore for MemoryStore {
    fn insert_settings(&self, settings: HandbrakeSettings) -> StoreResult<()> {
        let mut table = write(&self.settings)?;
        let clash = table.values().any(|s| {
            s.video_analysis_id == settings.video_analysis_id && s.version == settings.version
        });
        if clash || table.contains_key(&settings.id) {
            return Err(StoreError::Conflict(format!(
                "settings version {} already exists for analysis {}",
                settings.version, settings.video_analysis_id
            )));
        }
        self.persist(SETTINGS, &settings.id, &settings)?;
        table.insert(settings.id.clone(), settings);
        Ok(())
    }

    fn get_settings(&self, id: &str) -> StoreResult<HandbrakeSettings> {
        read(&self.settings)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("handbrake_settings", id))
    }

    fn latest_settings(&self, analysis_id: &str) -> StoreResult<Option<HandbrakeSettings>> {
        Ok(read(&self.settings)?
            .values()
            .filter(|s| s.video_analysis_id == analysis_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    fn list_settings(&self, analysis_id: &str) -> StoreResult<Vec<HandbrakeSettings>> {
        let mut versions: Vec<HandbrakeSettings> = read(&self.settings)?
            .values()
            .filter(|s| s.video_analysis_id == analysis_id)
            .cloned()
            .collect();
        versions.sort_by_key(|s| s.version);
        Ok(versions)
    }
}

impl JobStore for MemoryStore {
    fn insert_job(&self, job: HandbrakeJob) -> StoreResult<()> {
        let mut table = write(&self.jobs)?;
        if table.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        self.persist(JOBS, &job.id, &job)?;
        table.insert(job.id.clone(), job);
        Ok(())
    }

    fn get_job(&self, id: &str) -> StoreResult<HandbrakeJob> {
        read(&self.jobs)?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("handbrake_job", id))
    }

    fn list_jobs(&self) -> StoreResult<Vec<HandbrakeJob>> {
        let mut all: Vec<HandbrakeJob> = read(&self.jobs)?.values().cloned().collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(all)
    }

    fn list_jobs_by_status(&self, status: JobStatus) -> StoreResult<Vec<HandbrakeJob>> {
        let mut matching: Vec<HandbrakeJob> = read(&self.jobs)?
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matching)
    }

    fn list_jobs_for_analysis(&self, analysis_id: &str) -> StoreResult<Vec<HandbrakeJob>> {
        let mut matching: Vec<HandbrakeJob> = read(&self.jobs)?
            .values()
            .filter(|j| j.video_analysis_id == analysis_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matching)
    }

    fn transition(
        &self,
        id: &str,
        expected: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<Transition> {
        let lock = self.job_lock(id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        let current = self.get_job(id)?;

        let mut next = current.clone();
        if let Err(reason) = next.apply(expected, update, current_timestamp_ms()) {
            return Ok(Transition::Rejected { current, reason });
        }

        self.persist(JOBS, id, &next)?;
        self.commit_job(next.clone())?;
        Ok(Transition::Applied(next))
    }

    fn request_cancel(&self, id: &str) -> StoreResult<HandbrakeJob> {
        let lock = self.job_lock(id)?;
        let _guard = lock
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        let current = self.get_job(id)?;

        let mut next = current.clone();
        if !next.request_cancel(current_timestamp_ms()) || current.cancel_requested {
            return Ok(current);
        }

        self.persist(JOBS, id, &next)?;
        self.commit_job(next.clone())?;
        Ok(next)
    }
}

impl DirectoryStore for MemoryStore {
    fn insert_directory(&self, directory: DirectoryConfig) -> StoreResult<()> {
        let mut table = write(&self.directories)?;
        if table.values().any(|d| d.path == directory.path) {
            return Err(StoreError::Conflict(format!(
                "directory {} is already configured",
                directory.path.display()
            )));
        }
        self.persist(DIRECTORIES, &directory.id, &directory)?;
        table.insert(directory.id.clone(), directory);
        Ok(())
    }

    fn list_directories(&self) -> StoreResult<Vec<DirectoryConfig>> {
        let mut all: Vec<DirectoryConfig> = read(&self.directories)?.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }

    fn remove_directory(&self, id: &str) -> StoreResult<DirectoryConfig> {
        let mut table = write(&self.directories)?;
        if !table.contains_key(id) {
            return Err(StoreError::not_found("directory_config", id));
        }
        if let Some(dir) = &self.state_dir {
            delete_record(dir, DIRECTORIES, id)?;
        }
        table
            .remove(id)
            .ok_or_else(|| StoreError::not_found("directory_config", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::CANCELLED_MESSAGE;
    use crate::models::fixtures::analysis;
    use tempfile::TempDir;

    fn job() -> HandbrakeJob {
        HandbrakeJob::new(
            "analysis-1".to_string(),
            None,
            PathBuf::from("/media/in.mkv"),
            PathBuf::from("/tmp/out/in.mkv"),
        )
    }

    fn claim(owner: &str) -> JobUpdate {
        JobUpdate::Claim {
            owner: owner.to_string(),
        }
    }

    #[test]
    fn test_claim_is_compare_and_swap() {
        let store = MemoryStore::in_memory();
        let j = job();
        let id = j.id.clone();
        store.insert_job(j).unwrap();

        let first = store.transition(&id, JobStatus::Queued, claim("w1")).unwrap();
        assert!(first.is_applied());
        assert_eq!(first.job().owner.as_deref(), Some("w1"));

        let second = store.transition(&id, JobStatus::Queued, claim("w2")).unwrap();
        assert!(!second.is_applied());
        assert_eq!(store.get_job(&id).unwrap().owner.as_deref(), Some("w1"));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::in_memory());
        let j = job();
        let id = j.id.clone();
        store.insert_job(j).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    store
                        .transition(&id, JobStatus::Queued, claim(&format!("w{}", i)))
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.get_job(&id).unwrap().attempts, 1);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let store = MemoryStore::in_memory();
        assert!(matches!(
            store.get_job("missing"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.transition("missing", JobStatus::Queued, claim("w")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.request_cancel("missing"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_queued_jobs_are_fifo_with_id_tiebreak() {
        let store = MemoryStore::in_memory();
        let mut a = job();
        let mut b = job();
        let mut c = job();
        a.id = "b-job".to_string();
        a.enqueued_at = 10;
        b.id = "a-job".to_string();
        b.enqueued_at = 10;
        c.id = "c-job".to_string();
        c.enqueued_at = 5;
        for j in [a, b, c] {
            store.insert_job(j).unwrap();
        }

        let order: Vec<String> = store
            .queued_jobs()
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(order, vec!["c-job", "a-job", "b-job"]);
    }

    #[test]
    fn test_jobs_for_analysis_filters_and_orders_by_creation() {
        let store = MemoryStore::in_memory();
        let mut later = job();
        later.id = "later".to_string();
        later.created_at = 20;
        let mut earlier = job();
        earlier.id = "earlier".to_string();
        earlier.created_at = 10;
        let mut other = job();
        other.id = "other".to_string();
        other.video_analysis_id = "analysis-2".to_string();
        for j in [later, earlier, other] {
            store.insert_job(j).unwrap();
        }

        let ids: Vec<String> = store
            .list_jobs_for_analysis("analysis-1")
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["earlier", "later"]);
        assert_eq!(store.list_jobs_for_analysis("analysis-2").unwrap().len(), 1);
        assert!(store.list_jobs_for_analysis("missing").unwrap().is_empty());
    }

    #[test]
    fn test_request_cancel_on_terminal_job_is_noop() {
        let store = MemoryStore::in_memory();
        let j = job();
        let id = j.id.clone();
        store.insert_job(j).unwrap();
        store
            .transition(
                &id,
                JobStatus::Queued,
                JobUpdate::Fail {
                    owner: None,
                    message: CANCELLED_MESSAGE.to_string(),
                },
            )
            .unwrap();

        let after = store.request_cancel(&id).unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert!(!after.cancel_requested);
    }

    #[test]
    fn test_settings_versions() {
        let store = MemoryStore::in_memory();
        let recommender = crate::recommend::SettingsRecommender::new("/out", "HandBrakeCLI");
        let a = analysis(1920, 1080, "h264", "mp4");
        let v1 = recommender.recommend(&a).unwrap();
        let mut v2 = recommender.recommend(&a).unwrap();
        v2.version = 2;

        store.insert_settings(v1.clone()).unwrap();
        store.insert_settings(v2.clone()).unwrap();

        let mut dup = recommender.recommend(&a).unwrap();
        dup.version = 2;
        assert!(matches!(
            store.insert_settings(dup),
            Err(StoreError::Conflict(_))
        ));

        assert_eq!(store.latest_settings(&a.id).unwrap().unwrap().id, v2.id);
        assert_eq!(store.list_settings(&a.id).unwrap().len(), 2);
        assert!(store.latest_settings("other").unwrap().is_none());
    }

    #[test]
    fn test_analyses_list_newest_first() {
        let store = MemoryStore::in_memory();
        for (id, created) in [("old", 1), ("new", 3), ("mid", 2)] {
            let mut a = analysis(1920, 1080, "h264", "mp4");
            a.id = id.to_string();
            a.created_at = created;
            store.insert_analysis(a).unwrap();
        }
        let ids: Vec<String> = store
            .list_analyses()
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(store.find_analyses_by_filename("movie.mkv").unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_directory_path_conflicts() {
        let store = MemoryStore::in_memory();
        store
            .insert_directory(DirectoryConfig::new(PathBuf::from("/media")))
            .unwrap();
        assert!(matches!(
            store.insert_directory(DirectoryConfig::new(PathBuf::from("/media"))),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip_fails_orphaned_running_jobs() {
        let temp = TempDir::new().unwrap();
        let (queued_id, running_id) = {
            let store = MemoryStore::open(temp.path()).unwrap();
            store
                .insert_analysis(analysis(1920, 1080, "h264", "mp4"))
                .unwrap();
            let dir = DirectoryConfig::new(PathBuf::from("/media"));
            let dir_id = dir.id.clone();
            store.insert_directory(dir).unwrap();
            store
                .insert_directory(DirectoryConfig::new(PathBuf::from("/other")))
                .unwrap();
            store.remove_directory(&dir_id).unwrap();

            let queued = job();
            let running = job();
            let ids = (queued.id.clone(), running.id.clone());
            store.insert_job(queued).unwrap();
            store.insert_job(running).unwrap();
            store
                .transition(&ids.1, JobStatus::Queued, claim("w1"))
                .unwrap();
            ids
        };

        let reopened = MemoryStore::open(temp.path()).unwrap();
        assert_eq!(reopened.list_analyses().unwrap().len(), 1);
        let dirs = reopened.list_directories().unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].path, PathBuf::from("/other"));

        assert_eq!(reopened.get_job(&queued_id).unwrap().status, JobStatus::Queued);
        let running = reopened.get_job(&running_id).unwrap();
        assert_eq!(running.status, JobStatus::Failed);
        assert_eq!(running.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(running.owner.is_none());
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let temp = TempDir::new().unwrap();
        let jobs_dir = temp.path().join(JOBS);
        fs::create_dir_all(&jobs_dir).unwrap();
        fs::write(jobs_dir.join("broken.json"), "{ not json").unwrap();

        let store = MemoryStore::open(temp.path()).unwrap();
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_failed_insert_commits_nothing() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::open(temp.path()).unwrap();
        // a plain file where the jobs collection directory belongs
        fs::write(temp.path().join(JOBS), "not a directory").unwrap();

        let j = job();
        let id = j.id.clone();
        assert!(store.insert_job(j).is_err());
        assert!(matches!(
            store.get_job(&id),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_failed_transition_keeps_previous_state() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::open(temp.path()).unwrap();
        let j = job();
        let id = j.id.clone();
        store.insert_job(j).unwrap();

        let tmp = temp.path().join(JOBS).join(format!(".{}.json.tmp", id));
        fs::create_dir_all(&tmp).unwrap();

        assert!(store.transition(&id, JobStatus::Queued, claim("w1")).is_err());
        assert!(store.request_cancel(&id).is_err());
        let unchanged = store.get_job(&id).unwrap();
        assert_eq!(unchanged.status, JobStatus::Queued);
        assert!(unchanged.owner.is_none());
        assert_eq!(unchanged.attempts, 0);
        assert!(!unchanged.cancel_requested);

        fs::remove_dir(&tmp).unwrap();
        let claimed = store.transition(&id, JobStatus::Queued, claim("w1")).unwrap();
        assert!(claimed.is_applied());
        assert_eq!(claimed.job().attempts, 1);
    }

    #[test]
    fn test_persisted_concurrent_claims_have_one_winner() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::open(temp.path()).unwrap());
        let j = job();
        let id = j.id.clone();
        store.insert_job(j).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    store
                        .transition(&id, JobStatus::Queued, claim(&format!("w{}", i)))
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let in_memory = store.get_job(&id).unwrap();
        drop(store);
        let on_disk: HandbrakeJob = serde_json::from_str(
            &fs::read_to_string(temp.path().join(JOBS).join(format!("{}.json", id))).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk.owner, in_memory.owner);
        assert_eq!(on_disk.attempts, 1);
    }
}
