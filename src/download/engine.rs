//! Adapter around the external download engine.
//!
//! [`DownloadEngine`] is the seam the worker talks to; [`YtDlpEngine`] drives a
//! `yt-dlp` child process, turning its stdout into [`EngineProgress`] values
//! and its stderr into a classified [`FailureInfo`].

use super::engine_errors::FailureInfo;
use super::task::JobId;
use crate::app::config::{AudioFormat, Settings, VideoFormat};
use crate::auth::ResolvedCredentials;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PROGRESS_PREFIX: &str = "oxygen-progress";
const FILE_PREFIX: &str = "oxygen-file";
const DESTINATION_PREFIX: &str = "oxygen-dest";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const MP3_QUALITY: &str = "192K";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{}", .0.format())]
    Failed(FailureInfo),

    #[error("download cancelled")]
    Cancelled,
}

/// Everything the engine needs for one attempt
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub job_id: JobId,
    pub url: String,
    pub audio_only: bool,
    pub settings: Arc<Settings>,
    pub output_dir: PathBuf,
    pub credentials: ResolvedCredentials,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineProgress {
    Bytes { downloaded: u64, total: Option<u64> },
    Fraction(f64),
}

impl EngineProgress {
    /// Unclamped completion fraction, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match *self {
            Self::Bytes { downloaded, total: Some(total) } if total > 0 => {
                Some(downloaded as f64 / total as f64)
            }
            Self::Bytes { .. } => None,
            Self::Fraction(f) => Some(f),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// Final file after post-processing, when the engine reported it
    pub file: Option<PathBuf>,
}

#[async_trait]
pub trait DownloadEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Run one download attempt.
    ///
    /// Progress is sent on `progress` as it arrives; the sender is dropped when
    /// the attempt ends. Cancelling `cancel` must stop the attempt promptly and
    /// return [`EngineError::Cancelled`].
    async fn run(
        &self,
        request: &EngineRequest,
        progress: mpsc::Sender<EngineProgress>,
        cancel: CancellationToken,
    ) -> Result<EngineOutput, EngineError>;
}

/// yt-dlp as a child process
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Compose the command line for `request`
    pub fn build_args(request: &EngineRequest) -> Vec<String> {
        let settings = &request.settings;
        let mut args: Vec<String> = Vec::new();

        if request.audio_only {
            push_opt(&mut args, "-f", "bestaudio/best");
            push_flag(&mut args, "-x");
            match settings.audio_format {
                AudioFormat::Auto | AudioFormat::Mp3 => {
                    push_opt(&mut args, "--audio-format", "mp3");
                    push_opt(&mut args, "--audio-quality", MP3_QUALITY);
                }
                AudioFormat::Wav => push_opt(&mut args, "--audio-format", "wav"),
            }
        } else {
            push_opt(&mut args, "-f", settings.video_quality.format_selector());
            if settings.video_format != VideoFormat::Auto {
                push_opt(&mut args, "--merge-output-format", settings.video_format.as_str());
            }
        }

        push_opt(
            &mut args,
            "-o",
            request.output_dir.join(OUTPUT_TEMPLATE).to_string_lossy(),
        );
        push_opt(&mut args, "--concurrent-fragments", settings.segments.to_string());
        push_opt(&mut args, "--retries", settings.retries.to_string());
        push_opt(&mut args, "--buffer-size", settings.buffer_size.as_str());

        if let Some(proxy) = &settings.proxy {
            push_opt(&mut args, "--proxy", proxy.as_str());
        }
        if let Some(langs) = &settings.sublangs {
            push_flag(&mut args, "--write-subs");
            push_opt(&mut args, "--sub-langs", langs.as_str());
        }
        if settings.write_thumbnail {
            push_flag(&mut args, "--write-thumbnail");
        }
        if settings.embed_thumbnail {
            push_flag(&mut args, "--embed-thumbnail");
        }

        if let Some((_, cookie_file)) = &request.credentials.cookie {
            push_opt(&mut args, "--cookies", cookie_file.to_string_lossy());
        }
        if let Some((_, login)) = &request.credentials.login {
            push_opt(&mut args, "--username", login.username.as_str());
            push_opt(&mut args, "--password", login.password.as_str());
        }

        push_flag(&mut args, "--newline");
        push_flag(&mut args, "--progress");
        push_opt(
            &mut args,
            "--progress-template",
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
                PROGRESS_PREFIX
            ),
        );
        // --print implies --quiet, so the destination is reported through a print hook too
        push_opt(&mut args, "--print", format!("before_dl:{} %(filename)s", DESTINATION_PREFIX));
        push_opt(&mut args, "--print", format!("after_move:{} %(filepath)s", FILE_PREFIX));
        push_opt(&mut args, "--", request.url.as_str());

        args
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str) {
    args.push(flag.to_string());
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

/// One recognised line of engine stdout
#[derive(Debug, Clone, PartialEq)]
enum EngineLine {
    Progress(EngineProgress),
    File(PathBuf),
    Destination(PathBuf),
}

fn parse_count(field: Option<&str>) -> Option<u64> {
    field
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64)
}

fn parse_line(line: &str) -> Option<EngineLine> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let mut fields = rest.split_whitespace();
        let downloaded = parse_count(fields.next())?;
        let total = parse_count(fields.next());
        let estimate = parse_count(fields.next());
        return Some(EngineLine::Progress(EngineProgress::Bytes {
            downloaded,
            total: total.or(estimate),
        }));
    }

    if let Some(rest) = line.strip_prefix(FILE_PREFIX) {
        let path = rest.trim();
        return (!path.is_empty()).then(|| EngineLine::File(PathBuf::from(path)));
    }

    if let Some(rest) = line.strip_prefix(DESTINATION_PREFIX) {
        let path = rest.trim();
        return (!path.is_empty()).then(|| EngineLine::Destination(PathBuf::from(path)));
    }

    None
}

#[derive(Debug, Default)]
struct StdoutSummary {
    final_file: Option<PathBuf>,
    destinations: Vec<PathBuf>,
}

/// True for yt-dlp leftovers of `stem`: `<stem>.<anything>.part`, `.ytdl`
/// state files and `.part-FragN` fragments. Format-specific downloads such as
/// `Title.f137.mp4.part` share the stem of the merged destination.
fn is_partial_of(name: &str, stem: &str) -> bool {
    let Some(rest) = name.strip_prefix(stem) else {
        return false;
    };
    rest.starts_with('.') && (rest.ends_with(".part") || rest.ends_with(".ytdl") || rest.contains(".part-Frag"))
}

/// Remove `.part` leftovers of the destinations seen during a failed attempt
async fn remove_partials(destinations: &[PathBuf]) {
    for dest in destinations {
        let (Some(dir), Some(stem)) = (dest.parent(), dest.file_stem().and_then(|s| s.to_str())) else {
            continue;
        };

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Cannot scan {:?} for partial files: {}", dir, e);
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_str().is_some_and(|name| is_partial_of(name, stem)) {
                continue;
            }
            let candidate = entry.path();
            match tokio::fs::remove_file(&candidate).await {
                Ok(()) => tracing::debug!("Removed partial file {:?}", candidate),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove partial file {:?}: {}", candidate, e),
            }
        }
    }
}

#[async_trait]
impl DownloadEngine for YtDlpEngine {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn run(
        &self,
        request: &EngineRequest,
        progress: mpsc::Sender<EngineProgress>,
        cancel: CancellationToken,
    ) -> Result<EngineOutput, EngineError> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| {
                EngineError::Failed(FailureInfo::tooling(&format!(
                    "cannot create output folder {}: {}",
                    request.output_dir.display(),
                    e
                )))
            })?;

        let args = Self::build_args(request);
        tracing::debug!(
            "Spawning {} for job {} ({} args)",
            self.program.display(),
            request.job_id,
            args.len()
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Failed(FailureInfo::tooling(&format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                )))
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return Err(EngineError::Failed(FailureInfo::tooling("engine pipes unavailable")));
        };

        let job_id = request.job_id;
        // Shared so a cancelled attempt can read it without draining the pipe
        let summary = Arc::new(Mutex::new(StdoutSummary::default()));
        let stdout_reader = {
            let summary = summary.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_line(&line) {
                        Some(EngineLine::Progress(p)) => {
                            // Receiver gone means the worker stopped listening; keep draining
                            let _ = progress.send(p).await;
                        }
                        Some(EngineLine::File(path)) => {
                            lock(&summary).final_file = Some(path);
                        }
                        Some(EngineLine::Destination(path)) => {
                            lock(&summary).destinations.push(path);
                        }
                        None => tracing::trace!("[{}] {}", job_id, line),
                    }
                }
            })
        };

        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill engine for job {}: {}", job_id, e);
                }
                // Grandchildren may still hold the pipes open
                stdout_reader.abort();
                stderr_reader.abort();
                let destinations = std::mem::take(&mut lock(&summary).destinations);
                remove_partials(&destinations).await;
                tracing::info!("Engine stopped for job {}", job_id);
                return Err(EngineError::Cancelled);
            }
        };

        let _ = stdout_reader.await;
        let stderr = stderr_reader.await.unwrap_or_default();
        let summary = std::mem::take(&mut *lock(&summary));

        let status = status.map_err(|e| {
            EngineError::Failed(FailureInfo::tooling(&format!("failed to wait for engine: {}", e)))
        })?;

        if status.success() {
            let file = summary.final_file.or_else(|| summary.destinations.last().cloned());
            Ok(EngineOutput { file })
        } else {
            remove_partials(&summary.destinations).await;
            Err(EngineError::Failed(FailureInfo::classify(&stderr, status.code())))
        }
    }
}

fn lock(summary: &Mutex<StdoutSummary>) -> std::sync::MutexGuard<'_, StdoutSummary> {
    summary.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// True when `program` starts and exits successfully with `version_flag`
pub async fn tool_available(program: &Path, version_flag: &str) -> bool {
    Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
