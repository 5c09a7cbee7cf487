//! Persisted records: video analyses, settings recommendations and watch directories.
//!
//! Jobs live in [`crate::jobs`] together with their state machine.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Convert a filesystem time to milliseconds since Unix epoch.
pub fn system_time_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a new record id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Frame size in pixels. A zero dimension means the prober could not tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Vertical resolution, or None when missing or zero.
    pub fn known_height(&self) -> Option<u32> {
        (self.height > 0).then_some(self.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Technical metadata extracted from one source video. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoAnalysis {
    pub id: String,
    /// Base name of the source file.
    pub filename: String,
    /// Full path of the source file.
    pub file_path: PathBuf,
    pub file_size: u64,
    /// Duration in seconds.
    pub duration: f64,
    pub resolution: Resolution,
    pub video_codec: String,
    pub audio_codec: String,
    /// Bits per second.
    pub video_bitrate: Option<u64>,
    pub audio_bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub container_format: String,
    /// Source mtime at ingest, part of the watcher dedup key.
    pub source_modified_ms: Option<i64>,
    pub created_at: i64,
}

impl VideoAnalysis {
    /// Reject structurally invalid analyses before any decision runs on them.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.filename.trim().is_empty() {
            return Err(CoreError::validation("analysis has an empty filename"));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(CoreError::validation("analysis has an empty file path"));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(CoreError::validation(format!(
                "analysis duration must be a non-negative number, got {}",
                self.duration
            )));
        }
        if let Some(fps) = self.frame_rate {
            if !fps.is_finite() || fps < 0.0 {
                return Err(CoreError::validation(format!(
                    "analysis frame rate must be a non-negative number, got {}",
                    fps
                )));
            }
        }
        Ok(())
    }
}

/// One encoder parameter recommendation for an analysis.
///
/// Recomputing creates a new record with a higher `version`; the highest
/// version is the current recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandbrakeSettings {
    pub id: String,
    pub video_analysis_id: String,
    pub version: u32,
    pub preset: String,
    pub video_encoder: String,
    /// Constant rate factor.
    pub quality: u8,
    pub container: String,
    pub audio_encoder: String,
    /// Estimated output/input size ratio in (0, 1].
    pub estimated_compression: f64,
    pub reasoning: String,
    pub output_file: PathBuf,
    pub full_command: String,
    pub created_at: i64,
}

/// A filesystem location scanned for new source videos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub monitor_enabled: bool,
    /// Compute a settings recommendation right after ingest.
    #[serde(default = "default_true")]
    pub auto_analyze: bool,
    pub created_at: i64,
}

fn default_true() -> bool {
    true
}

impl DirectoryConfig {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: new_id(),
            path,
            monitor_enabled: true,
            auto_analyze: true,
            created_at: current_timestamp_ms(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::analysis;
    use super::*;

    #[test]
    fn test_resolution_display_and_known_height() {
        let res = Resolution::new(3840, 2160);
        assert_eq!(res.to_string(), "3840x2160");
        assert_eq!(res.known_height(), Some(2160));
        assert_eq!(Resolution::new(1920, 0).known_height(), None);
        assert_eq!(Resolution::default().known_height(), None);
    }

    #[test]
    fn test_valid_analysis_passes() {
        assert!(analysis(1920, 1080, "h264", "mp4").validate().is_ok());
    }

    #[test]
    fn test_empty_filename_is_rejected() {
        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.filename = "  ".to_string();
        assert!(matches!(a.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_negative_or_nan_duration_is_rejected() {
        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.duration = -1.0;
        assert!(matches!(a.validate(), Err(CoreError::Validation(_))));
        a.duration = f64::NAN;
        assert!(matches!(a.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_zero_duration_is_allowed() {
        let mut a = analysis(1920, 1080, "h264", "mp4");
        a.duration = 0.0;
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_directory_config_defaults() {
        let dir = DirectoryConfig::new(PathBuf::from("/media/incoming"));
        assert!(dir.monitor_enabled);
        assert!(dir.auto_analyze);
        assert_eq!(dir.id.len(), 36);

        let parsed: DirectoryConfig = serde_json::from_str(
            r#"{"id":"d1","path":"/media","created_at":1}"#,
        )
        .unwrap();
        assert!(parsed.monitor_enabled);
        assert!(parsed.auto_analyze);
    }
}
