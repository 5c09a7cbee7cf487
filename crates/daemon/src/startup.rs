//! Startup checks module
//!
//! Preflight checks run before the daemon accepts work:
//! - HandBrakeCLI is installed and answers `--version`
//! - ffprobe is installed and answers `-version`
//! - the encoder output directory exists (or can be created) and is writable

use crate::config::Config;
use std::fs;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("HandBrakeCLI not available: {0}")]
    HandbrakeUnavailable(String),

    #[error("ffprobe not available: {0}")]
    FfprobeUnavailable(String),

    #[error("Output directory {path} is not usable: {reason}")]
    OutputDir { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tool versions found by the preflight checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub handbrake_version: Option<String>,
    pub ffprobe_version: Option<String>,
}

/// Extract the version token following `marker` on the first line that has it.
///
/// Handles the common formats:
/// - "HandBrake 1.7.2"
/// - "ffprobe version 6.1.1-3ubuntu5 Copyright ..."
/// - "ffprobe version n7.0-..." (git builds, `n` prefix stripped)
pub fn parse_tool_version(output: &str, marker: &str) -> Option<String> {
    let marker = marker.to_lowercase();
    let line = output
        .lines()
        .find(|line| line.to_lowercase().contains(&marker))?;

    let lower = line.to_lowercase();
    let start = lower.find(&marker)? + marker.len();
    let token = line.get(start..)?.split_whitespace().next()?;
    let token = token.strip_prefix('n').unwrap_or(token);

    if token.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Run `program arg` and return its combined output on success.
fn run_version_command(program: &str, arg: &str) -> Result<String, String> {
    let output = Command::new(program)
        .arg(arg)
        .output()
        .map_err(|e| format!("{} {} failed; is it installed and in PATH? Error: {}", program, arg, e))?;

    if !output.status.success() {
        return Err(format!("{} {} exited with {}", program, arg, output.status));
    }

    // HandBrakeCLI prints its banner on stdout but some builds log to stderr.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Check that HandBrakeCLI runs, returning its version if it could be parsed.
pub fn check_handbrake_available(program: &str) -> Result<Option<String>, StartupError> {
    let output = run_version_command(program, "--version").map_err(StartupError::HandbrakeUnavailable)?;
    Ok(parse_tool_version(&output, "handbrake "))
}

/// Check that ffprobe runs, returning its version if it could be parsed.
pub fn check_ffprobe_available(program: &str) -> Result<Option<String>, StartupError> {
    let output = run_version_command(program, "-version").map_err(StartupError::FfprobeUnavailable)?;
    Ok(parse_tool_version(&output, "ffprobe version"))
}

/// Create `dir` if needed and confirm a file can be written into it.
pub fn check_output_dir(dir: &Path) -> Result<(), StartupError> {
    let fail = |reason: String| StartupError::OutputDir {
        path: dir.display().to_string(),
        reason,
    };

    fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    let probe = dir.join(".hb-optimizer-write-check");
    fs::write(&probe, b"ok").map_err(|e| fail(e.to_string()))?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// Run all startup checks in order
///
/// 1. HandBrakeCLI availability
/// 2. ffprobe availability
/// 3. Output directory writability
pub fn run_startup_checks(cfg: &Config) -> Result<StartupReport, StartupError> {
    let handbrake_version = check_handbrake_available(&cfg.encoder.handbrake_path)?;
    let ffprobe_version = check_ffprobe_available(&cfg.encoder.ffprobe_path)?;
    check_output_dir(&cfg.encoder.output_dir)?;

    info!(
        handbrake = handbrake_version.as_deref().unwrap_or("unknown"),
        ffprobe = ffprobe_version.as_deref().unwrap_or("unknown"),
        "Startup checks passed"
    );
    Ok(StartupReport {
        handbrake_version,
        ffprobe_version,
    })
}
