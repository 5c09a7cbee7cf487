//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// CPU-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CpuConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
}

/// Job scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Worker pool size (0 = auto-derive)
    #[serde(default)]
    pub workers: u32,
    /// Attempts allowed per job before a transient failure becomes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock limit for a single encode attempt
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How long a cancelled encoder may take to exit before it is killed
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Idle dispatch poll and cancel-flag poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Minimum spacing between persisted progress updates
    #[serde(default = "default_progress_flush_ms")]
    pub progress_flush_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_cancel_grace_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_progress_flush_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_attempts: default_max_attempts(),
            job_timeout_secs: default_job_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_flush_ms: default_progress_flush_ms(),
        }
    }
}

/// External tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// HandBrakeCLI executable
    #[serde(default = "default_handbrake_path")]
    pub handbrake_path: String,
    /// ffprobe executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Directory encoded files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_handbrake_path() -> String {
    "HandBrakeCLI".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/tmp/handbrake_output")
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            handbrake_path: default_handbrake_path(),
            ffprobe_path: default_ffprobe_path(),
            output_dir: default_output_dir(),
        }
    }
}

/// Directory watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Files modified more recently than this are left for the next tick
    #[serde(default = "default_min_file_age_secs")]
    pub min_file_age_secs: u64,
    /// Enqueue an encoding job for every newly ingested file
    #[serde(default)]
    pub auto_enqueue: bool,
    /// Directories registered as watch roots at startup
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_min_file_age_secs() -> u64 {
    10
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: default_scan_interval_secs(),
            min_file_age_secs: default_min_file_age_secs(),
            auto_enqueue: false,
            directories: Vec::new(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    /// Directory for JSON records; records are kept in memory only if None
    pub state_dir: Option<PathBuf>,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

fn default_metrics_bind() -> String {
    "127.0.0.1:7879".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_metrics_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub cpu: CpuConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Values that fail to parse are ignored and the file value is kept:
    /// - CPU_LOGICAL_CORES -> cpu.logical_cores
    /// - HBO_WORKERS -> scheduler.workers
    /// - HBO_MAX_ATTEMPTS -> scheduler.max_attempts
    /// - HBO_JOB_TIMEOUT_SECS -> scheduler.job_timeout_secs
    /// - HANDBRAKE_CLI -> encoder.handbrake_path
    /// - FFPROBE_PATH -> encoder.ffprobe_path
    /// - HBO_OUTPUT_DIR -> encoder.output_dir
    /// - HBO_WATCHER_ENABLED -> watcher.enabled
    /// - HBO_STATE_DIR -> storage.state_dir
    /// - HBO_METRICS_BIND -> metrics.bind
    pub fn apply_env_overrides(&mut self) {
        if let Some(cores) = parse_env::<u32>("CPU_LOGICAL_CORES") {
            self.cpu.logical_cores = Some(cores);
        }
        if let Some(workers) = parse_env::<u32>("HBO_WORKERS") {
            self.scheduler.workers = workers;
        }
        if let Some(attempts) = parse_env::<u32>("HBO_MAX_ATTEMPTS") {
            self.scheduler.max_attempts = attempts;
        }
        if let Some(secs) = parse_env::<u64>("HBO_JOB_TIMEOUT_SECS") {
            self.scheduler.job_timeout_secs = secs;
        }

        if let Some(path) = non_empty_env("HANDBRAKE_CLI") {
            self.encoder.handbrake_path = path;
        }
        if let Some(path) = non_empty_env("FFPROBE_PATH") {
            self.encoder.ffprobe_path = path;
        }
        if let Some(dir) = non_empty_env("HBO_OUTPUT_DIR") {
            self.encoder.output_dir = PathBuf::from(dir);
        }

        if let Ok(val) = env::var("HBO_WATCHER_ENABLED") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.watcher.enabled = true,
                "false" | "0" | "no" => self.watcher.enabled = false,
                _ => {}
            }
        }

        if let Some(dir) = non_empty_env("HBO_STATE_DIR") {
            self.storage.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(bind) = non_empty_env("HBO_METRICS_BIND") {
            self.metrics.bind = bind;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "CPU_LOGICAL_CORES",
        "HBO_WORKERS",
        "HBO_MAX_ATTEMPTS",
        "HBO_JOB_TIMEOUT_SECS",
        "HANDBRAKE_CLI",
        "FFPROBE_PATH",
        "HBO_OUTPUT_DIR",
        "HBO_WATCHER_ENABLED",
        "HBO_STATE_DIR",
        "HBO_METRICS_BIND",
    ];

    fn clear_env_vars() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            logical_cores in proptest::option::of(1u32..256),
            workers in 0u32..16,
            max_attempts in 1u32..10,
            timeout in 1u64..100_000,
            scan_interval in 1u64..3600,
            auto_enqueue in proptest::bool::ANY,
            metrics_enabled in proptest::bool::ANY,
        ) {
            let toml_str = format!(
                r#"
[cpu]
{}

[scheduler]
workers = {}
max_attempts = {}
job_timeout_secs = {}

[encoder]
handbrake_path = "/opt/hb/HandBrakeCLI"
output_dir = "/srv/encoded"

[watcher]
scan_interval_secs = {}
auto_enqueue = {}
directories = ["/media/incoming"]

[storage]
state_dir = "/var/lib/hbo"

[metrics]
enabled = {}
"#,
                logical_cores.map(|c| format!("logical_cores = {}", c)).unwrap_or_default(),
                workers,
                max_attempts,
                timeout,
                scan_interval,
                auto_enqueue,
                metrics_enabled,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.cpu.logical_cores, logical_cores);
            prop_assert_eq!(config.scheduler.workers, workers);
            prop_assert_eq!(config.scheduler.max_attempts, max_attempts);
            prop_assert_eq!(config.scheduler.job_timeout_secs, timeout);
            prop_assert_eq!(config.scheduler.cancel_grace_secs, 10);
            prop_assert_eq!(config.encoder.handbrake_path.as_str(), "/opt/hb/HandBrakeCLI");
            prop_assert_eq!(config.encoder.ffprobe_path.as_str(), "ffprobe");
            prop_assert_eq!(&config.encoder.output_dir, &PathBuf::from("/srv/encoded"));
            prop_assert_eq!(config.watcher.scan_interval_secs, scan_interval);
            prop_assert_eq!(config.watcher.auto_enqueue, auto_enqueue);
            prop_assert_eq!(&config.watcher.directories, &vec![PathBuf::from("/media/incoming")]);
            prop_assert_eq!(&config.storage.state_dir, &Some(PathBuf::from("/var/lib/hbo")));
            prop_assert_eq!(config.metrics.enabled, metrics_enabled);
        }

        #[test]
        fn prop_env_overrides_scheduler_values(
            initial_workers in 0u32..8,
            override_workers in 0u32..16,
            override_attempts in 1u32..10,
            override_timeout in 1u64..100_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[scheduler]\nworkers = {}\n", initial_workers);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HBO_WORKERS", override_workers.to_string());
            env::set_var("HBO_MAX_ATTEMPTS", override_attempts.to_string());
            env::set_var("HBO_JOB_TIMEOUT_SECS", override_timeout.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.scheduler.workers, override_workers);
            prop_assert_eq!(config.scheduler.max_attempts, override_attempts);
            prop_assert_eq!(config.scheduler.job_timeout_secs, override_timeout);
        }

        #[test]
        fn prop_env_overrides_cpu_logical_cores(
            initial_cores in proptest::option::of(1u32..128),
            override_cores in 1u32..256,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                "[cpu]\n{}\n",
                initial_cores.map(|c| format!("logical_cores = {}", c)).unwrap_or_default()
            );
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CPU_LOGICAL_CORES", override_cores.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.cpu.logical_cores, Some(override_cores));
        }

        #[test]
        fn prop_env_overrides_watcher_enabled(
            initial in proptest::bool::ANY,
            overridden in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[watcher]\nenabled = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("HBO_WATCHER_ENABLED", overridden.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.watcher.enabled, overridden);
        }
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.cpu.logical_cores, None);
        assert_eq!(config.scheduler.workers, 0);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.scheduler.job_timeout_secs, 1800);
        assert_eq!(config.scheduler.poll_interval_ms, 1000);
        assert_eq!(config.encoder.handbrake_path, "HandBrakeCLI");
        assert_eq!(config.encoder.output_dir, PathBuf::from("/tmp/handbrake_output"));
        assert!(config.watcher.enabled);
        assert!(!config.watcher.auto_enqueue);
        assert!(config.watcher.directories.is_empty());
        assert_eq!(config.storage.state_dir, None);
        assert_eq!(config.metrics.bind, "127.0.0.1:7879");
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("[scheduler]\nmax_attempts = 5\n").unwrap();
        env::set_var("HBO_MAX_ATTEMPTS", "lots");
        env::set_var("HBO_WATCHER_ENABLED", "maybe");
        env::set_var("HBO_STATE_DIR", "   ");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.scheduler.max_attempts, 5);
        assert!(config.watcher.enabled);
        assert_eq!(config.storage.state_dir, None);
    }

    #[test]
    fn test_env_overrides_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("HANDBRAKE_CLI", "/usr/local/bin/HandBrakeCLI");
        env::set_var("HBO_STATE_DIR", "/var/lib/hbo");
        env::set_var("HBO_OUTPUT_DIR", "/srv/out");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.handbrake_path, "/usr/local/bin/HandBrakeCLI");
        assert_eq!(config.storage.state_dir, Some(PathBuf::from("/var/lib/hbo")));
        assert_eq!(config.encoder.output_dir, PathBuf::from("/srv/out"));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = Config::parse_toml("[scheduler\nworkers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
