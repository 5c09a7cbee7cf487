//! HandBrakeCLI encoder module
//!
//! Builds HandBrakeCLI argument lists from a settings recommendation and
//! runs the encoder as a child process, translating its progress output
//! into percentages.

use super::{EncodeError, EncodeRequest, EncoderAdapter};
use crate::models::HandbrakeSettings;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Build the HandBrakeCLI argument list (without the program name).
///
/// The recommender renders the same list into `full_command`, so the stored
/// command and the executed one cannot drift apart.
pub fn handbrake_args(settings: &HandbrakeSettings, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-i".into(),
        input.as_os_str().to_owned(),
        "-o".into(),
        output.as_os_str().to_owned(),
        "--format".into(),
        format!("av_{}", settings.container).into(),
        "--encoder".into(),
        settings.video_encoder.clone().into(),
        "--encoder-preset".into(),
        settings.preset.replace('-', "").into(),
        "--quality".into(),
        settings.quality.to_string().into(),
        "--aencoder".into(),
        settings.audio_encoder.clone().into(),
    ]
}

/// Parse one HandBrakeCLI status segment into overall percent.
///
/// Recognizes `Encoding: task N of M, P %` (optionally followed by rate
/// details). Multi-pass encodes report one task per pass; the result spans
/// all of them.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let rest = &line[line.find("Encoding: task ")? + "Encoding: task ".len()..];
    let (task, rest) = rest.split_once(" of ")?;
    let (count, rest) = rest.split_once(',')?;
    let (percent, _) = rest.trim_start().split_once('%')?;

    let task: f64 = task.trim().parse().ok()?;
    let count: f64 = count.trim().parse().ok()?;
    let percent: f64 = percent.trim().parse().ok()?;
    if count < 1.0 || task < 1.0 || task > count || !percent.is_finite() {
        return None;
    }

    let overall = ((task - 1.0) + percent.clamp(0.0, 100.0) / 100.0) / count * 100.0;
    Some(overall.clamp(0.0, 100.0))
}

/// Runs HandBrakeCLI as a child process.
#[derive(Debug, Clone)]
pub struct HandbrakeCli {
    program: String,
}

impl HandbrakeCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for HandbrakeCli {
    fn default() -> Self {
        Self::new("HandBrakeCLI")
    }
}

#[async_trait]
impl EncoderAdapter for HandbrakeCli {
    async fn encode(
        &self,
        request: EncodeRequest,
        progress: watch::Sender<f64>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = handbrake_args(&request.settings, &request.input, &request.output);
        info!(
            job_id = %request.job_id,
            attempt = request.attempt,
            input = %request.input.display(),
            output = %request.output.display(),
            "Starting HandBrakeCLI"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    EncodeError::BinaryUnavailable(format!("{}: {}", self.program, e))
                }
                _ => EncodeError::Io(e),
            })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(pump_progress(stdout, progress)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr)));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(status) => status?,
            None => {
                info!(job_id = %request.job_id, "Cancel requested, stopping HandBrakeCLI");
                if let Err(e) = child.start_kill() {
                    warn!(job_id = %request.job_id, error = %e, "Failed to signal HandBrakeCLI");
                }
                let _ = child.wait().await;
                return Err(EncodeError::Cancelled);
            }
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        let tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let detail = if tail.is_empty() {
                "no stderr output".to_string()
            } else {
                tail
            };
            return Err(match status.code() {
                Some(code) => EncodeError::Exit { code, detail },
                None => EncodeError::Signal { detail },
            });
        }

        match tokio::fs::metadata(&request.output).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(job_id = %request.job_id, bytes = meta.len(), "Output verified");
                Ok(())
            }
            _ => Err(EncodeError::MissingOutput(request.output.clone())),
        }
    }
}

/// Read encoder stdout, splitting on `\r` as well as `\n` since progress
/// lines are rewritten in place.
async fn pump_progress<R: AsyncRead + Unpin>(mut reader: R, progress: watch::Sender<f64>) {
    let mut buf = [0u8; 4096];
    let mut segment = Vec::new();

    let publish = |segment: &[u8]| {
        if let Some(percent) = parse_progress_line(&String::from_utf8_lossy(segment)) {
            progress.send_if_modified(|current| {
                if percent > *current {
                    *current = percent;
                    true
                } else {
                    false
                }
            });
        }
    };

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\r' || byte == b'\n' {
                publish(&segment);
                segment.clear();
            } else {
                segment.push(byte);
            }
        }
    }
    publish(&segment);
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
