//! Metadata probing for source videos.
//!
//! The prober itself is an external tool; [`FfprobeProbe`] shells out to
//! `ffprobe` and parses its JSON report. Other implementations (tests, remote
//! probers) plug in through [`MetadataProbe`].

use crate::models::{current_timestamp_ms, new_id, Resolution, VideoAnalysis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Share of the container bitrate attributed to video when the stream
/// carries no bitrate of its own.
const VIDEO_SHARE_OF_TOTAL_BITRATE: f64 = 0.8;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The file has no video stream.
    #[error("No video stream found")]
    NoVideoStream,

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Technical metadata reported by a prober for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbedMetadata {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: Option<u64>,
    pub audio_bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
    pub aspect_ratio: Option<String>,
    pub container_format: String,
}

impl ProbedMetadata {
    /// Build the analysis record for `path` from this report.
    ///
    /// The filesystem size wins; the prober's figure is used when it is zero.
    pub fn into_analysis(
        self,
        path: &Path,
        fs_size: u64,
        source_modified_ms: Option<i64>,
    ) -> VideoAnalysis {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        VideoAnalysis {
            id: new_id(),
            filename,
            file_path: path.to_path_buf(),
            file_size: if fs_size > 0 { fs_size } else { self.size_bytes },
            duration: self.duration_secs,
            resolution: Resolution::new(self.width, self.height),
            video_codec: self.video_codec,
            audio_codec: self.audio_codec,
            video_bitrate: self.video_bitrate,
            audio_bitrate: self.audio_bitrate,
            frame_rate: self.frame_rate,
            aspect_ratio: self.aspect_ratio,
            container_format: self.container_format,
            source_modified_ms,
            created_at: current_timestamp_ms(),
        }
    }
}

/// Extracts technical metadata from a media file.
///
/// Implementations block; async callers run them on the blocking pool.
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbedMetadata, ProbeError>;
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub bit_rate: Option<String>,
        pub r_frame_rate: Option<String>,
        pub display_aspect_ratio: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
        pub size: Option<String>,
    }
}

/// Probes files by running ffprobe.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MetadataProbe for FfprobeProbe {
    /// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
    /// and parses the JSON output.
    fn probe(&self, path: &Path) -> Result<ProbedMetadata, ProbeError> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_output(&stdout)
    }
}

/// Parse an ffprobe rational such as `30000/1001`.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num = num.trim().parse::<f64>().ok()?;
    let den = den.trim().parse::<f64>().ok()?;
    if den == 0.0 {
        return None;
    }
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_u64(raw: Option<&String>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
}

/// Parses ffprobe JSON output. The first video and first audio stream win.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbedMetadata, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;
    let audio = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let duration_secs = format
        .duration
        .as_ref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);
    let size_bytes = parse_u64(format.size.as_ref()).unwrap_or(0);

    let video_bitrate = parse_u64(video.bit_rate.as_ref()).or_else(|| {
        (duration_secs > 0.0 && size_bytes > 0).then(|| {
            let total = (size_bytes as f64 * 8.0) / duration_secs;
            (total * VIDEO_SHARE_OF_TOTAL_BITRATE) as u64
        })
    });

    let audio_codec = match audio {
        Some(stream) => stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        None => "none".to_string(),
    };

    Ok(ProbedMetadata {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        duration_secs,
        size_bytes,
        video_codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        audio_codec,
        video_bitrate,
        audio_bitrate: audio.and_then(|s| parse_u64(s.bit_rate.as_ref())),
        frame_rate: video.r_frame_rate.as_deref().and_then(parse_frame_rate),
        aspect_ratio: video.display_aspect_ratio.clone(),
        container_format: format
            .format_name
            .unwrap_or_else(|| "unknown".to_string()),
    })
}
