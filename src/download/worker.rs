use super::completion_log::{LogEntry, LogResult, LogStore};
use super::engine::{DownloadEngine, EngineError, EngineProgress, EngineRequest};
use super::engine_errors::FailureCategory;
use super::notifier::{Event, EventNotifier};
use super::queue::JobQueue;
use super::task::{DownloadJob, JobId, JobOutcome};
use crate::auth::{CredentialKind, CredentialStatus, CredentialStore, ResolvedCredentials};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

/// Turns raw engine progress into the non-decreasing, clamped sequence
/// observers see for one job.
struct ProgressTracker {
    job_id: JobId,
    notifier: EventNotifier,
    reported: f64,
}

impl ProgressTracker {
    fn new(job_id: JobId, notifier: EventNotifier) -> Self {
        notifier.emit(Event::Progress { job_id, fraction: 0.0 });
        Self {
            job_id,
            notifier,
            reported: 0.0,
        }
    }

    fn observe(&mut self, progress: EngineProgress) {
        let Some(fraction) = progress.fraction() else {
            return;
        };
        if !fraction.is_finite() {
            return;
        }
        let clamped = fraction.clamp(0.0, 1.0);
        if clamped > self.reported {
            self.reported = clamped;
            self.notifier.emit(Event::Progress {
                job_id: self.job_id,
                fraction: clamped,
            });
        }
    }

    async fn forward(&mut self, mut rx: mpsc::Receiver<EngineProgress>) {
        while let Some(progress) = rx.recv().await {
            self.observe(progress);
        }
    }

    fn complete(&mut self) {
        if self.reported < 1.0 {
            self.reported = 1.0;
            self.notifier.emit(Event::Progress {
                job_id: self.job_id,
                fraction: 1.0,
            });
        }
    }
}

/// The single consumer of the [`JobQueue`]
pub struct DownloadWorker {
    queue: JobQueue,
    engine: Arc<dyn DownloadEngine>,
    notifier: EventNotifier,
    logs: Arc<LogStore>,
    credentials: Arc<CredentialStore>,
    retry_delay: Duration,
}

impl DownloadWorker {
    pub fn new(
        queue: JobQueue,
        engine: Arc<dyn DownloadEngine>,
        notifier: EventNotifier,
        logs: Arc<LogStore>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            queue,
            engine,
            notifier,
            logs,
            credentials,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Base delay for exponential backoff between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Drain the queue until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Download worker started ({} engine)", self.engine.name());

        'outer: loop {
            while let Some(job) = self.queue.next().await {
                let outcome = self.process(job, &cancel).await;
                if outcome == JobOutcome::Cancelled {
                    break 'outer;
                }
                if cancel.is_cancelled() {
                    break 'outer;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.wait_for_job() => {}
            }
        }

        let dropped = self.queue.close().await;
        if !dropped.is_empty() {
            tracing::info!("Discarded {} unstarted job(s) on shutdown", dropped.len());
        }
        tracing::info!("Download worker stopped");
    }

    /// Run one job to a terminal state.
    ///
    /// Appends exactly one log entry unless cancelled, clears the queue's
    /// running slot, then emits [`Event::DownloadReset`].
    pub async fn process(&self, job: DownloadJob, cancel: &CancellationToken) -> JobOutcome {
        let job_id = job.id();
        let settings = job.settings().clone();
        let output_dir = job.output_dir().to_path_buf();

        tracing::info!("Starting job {}: {}", job_id, job.url());
        self.notifier.emit(Event::JobStarted {
            job_id,
            url: job.url().to_string(),
            audio_only: job.audio_only(),
        });
        let mut tracker = ProgressTracker::new(job_id, self.notifier.clone());
        self.notifier.message(Some(job_id), format!("Downloading: {}", job.url()));

        let credentials = job
            .host()
            .map(|host| self.credentials.resolve(&host))
            .unwrap_or_default();
        if !credentials.is_empty() {
            tracing::debug!("Using stored credentials for job {}", job_id);
        }

        let request = EngineRequest {
            job_id,
            url: job.url().to_string(),
            audio_only: job.audio_only(),
            settings: settings.clone(),
            output_dir: output_dir.clone(),
            credentials: credentials.clone(),
        };

        let max_attempts = settings.retries.saturating_add(1);
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;
            let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
            let (result, ()) = tokio::join!(
                self.engine.run(&request, tx, cancel.clone()),
                tracker.forward(rx),
            );

            match result {
                Err(EngineError::Failed(info)) if info.is_retryable && attempts < max_attempts => {
                    let delay = backoff_delay(self.retry_delay, attempts);
                    tracing::info!(
                        "Retrying job {} in {:?} (attempt {}/{}): {}",
                        job_id,
                        delay,
                        attempts + 1,
                        max_attempts,
                        info.format()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => break other,
            }
        };

        let outcome = match result {
            Ok(output) => {
                tracker.complete();
                let name = output
                    .file
                    .as_ref()
                    .and_then(|f| f.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| job.url().to_string());
                tracing::info!("Job {} completed after {} attempt(s): {}", job_id, attempts, name);
                self.notifier.message(Some(job_id), format!("Download completed: {}", name));
                JobOutcome::Success {
                    file: output.file,
                    attempts,
                }
            }
            Err(EngineError::Cancelled) => {
                tracing::info!("Job {} cancelled", job_id);
                self.notifier.message(Some(job_id), format!("Download cancelled: {}", job.url()));
                JobOutcome::Cancelled
            }
            Err(EngineError::Failed(info)) => {
                tracing::error!(
                    "Job {} failed after {} attempt(s): {}",
                    job_id,
                    attempts,
                    info.format()
                );
                self.notifier.message(Some(job_id), format!("Download failed: {}", info.format()));
                JobOutcome::Failed {
                    error: info.format(),
                    category: info.category,
                    attempts,
                }
            }
        };

        if outcome != JobOutcome::Cancelled {
            let entry = self.log_entry(&job, &outcome);
            if let Err(e) = self.logs.append(&entry) {
                tracing::error!("Failed to append completion log for job {}: {:#}", job_id, e);
            }
            self.notifier.emit(Event::LogAppended { entry });
            self.record_credential_use(&credentials, &outcome);
        }

        self.queue.finish(job_id).await;
        self.notifier.emit(Event::DownloadReset {
            job_id: Some(job_id),
        });

        outcome
    }

    fn log_entry(&self, job: &DownloadJob, outcome: &JobOutcome) -> LogEntry {
        let result = if outcome.is_success() {
            LogResult::Success
        } else {
            LogResult::Failed
        };
        let mut entry = LogEntry::new(result, job.url(), job.output_dir());
        entry.job_id = Some(job.id());
        entry.audio_only = job.audio_only();
        match outcome {
            JobOutcome::Success { file, .. } => {
                entry.filename = file
                    .as_ref()
                    .and_then(|f| f.file_name())
                    .map(|n| n.to_string_lossy().into_owned());
            }
            JobOutcome::Failed { error, .. } => entry.error = Some(error.clone()),
            JobOutcome::Cancelled => {}
        }
        entry
    }

    fn record_credential_use(&self, credentials: &ResolvedCredentials, outcome: &JobOutcome) {
        let status = match outcome {
            JobOutcome::Failed {
                category: FailureCategory::Auth,
                ..
            } => CredentialStatus::Failure,
            _ => CredentialStatus::Success,
        };

        let used = credentials
            .cookie
            .as_ref()
            .map(|(domain, _)| (domain, CredentialKind::Cookie))
            .into_iter()
            .chain(
                credentials
                    .login
                    .as_ref()
                    .map(|(domain, _)| (domain, CredentialKind::Password)),
            );

        for (domain, kind) in used {
            if let Err(e) = self.credentials.record_use(domain, kind, status) {
                tracing::warn!("Failed to record {} status for {}: {}", kind, domain, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 10), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(base, 200), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(Duration::ZERO, 4), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_progress_tracker_clamps_and_never_decreases() {
        let notifier = EventNotifier::new(64);
        let mut rx = notifier.subscribe();
        let id = JobId::new(1);

        let mut tracker = ProgressTracker::new(id, notifier.clone());
        for p in [0.2, 0.1, f64::NAN, 0.5, -1.0, 1.7, 0.9] {
            tracker.observe(EngineProgress::Fraction(p));
        }
        tracker.observe(EngineProgress::Bytes { downloaded: 10, total: None });
        tracker.complete();

        let mut seen = Vec::new();
        while let Ok(Event::Progress { fraction, .. }) = rx.try_recv() {
            seen.push(fraction);
        }
        assert_eq!(seen, vec![0.0, 0.2, 0.5, 1.0]);
    }
}
