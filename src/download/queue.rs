use super::task::{DownloadJob, JobId};
use crate::app::config::Settings;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("a download is already in progress")]
    Busy,

    #[error("downloads are shutting down")]
    ShuttingDown,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<DownloadJob>,
    running: Option<JobId>,
    next_id: u64,
    closed: bool,
}

/// Single-flight job queue.
///
/// At most one job is accepted at a time: while a job is pending or running,
/// further submissions are rejected with [`EnqueueError::Busy`].
#[derive(Clone)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: None,
                next_id: 1,
                closed: false,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Accept a job for `url`, snapshotting `settings`
    pub async fn enqueue(
        &self,
        url: &str,
        audio_only: bool,
        settings: &Settings,
    ) -> Result<JobId, EnqueueError> {
        let url = validate_url(url)?;

        let id = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(EnqueueError::ShuttingDown);
            }
            if state.running.is_some() || !state.pending.is_empty() {
                tracing::debug!("Rejected {} while busy", url);
                return Err(EnqueueError::Busy);
            }

            let id = JobId::new(state.next_id);
            state.next_id += 1;
            let job = DownloadJob::new(id, url, audio_only, Arc::new(settings.clone()));
            state.pending.push_back(job);
            id
        };

        tracing::info!("Queued job {}", id);
        self.notify.notify_one();
        Ok(id)
    }

    /// True while a job is pending or running
    pub async fn is_busy(&self) -> bool {
        let state = self.state.lock().await;
        state.running.is_some() || !state.pending.is_empty()
    }

    /// Pop the head job and mark it running. Used only by the worker.
    pub async fn next(&self) -> Option<DownloadJob> {
        let mut state = self.state.lock().await;
        let job = state.pending.pop_front()?;
        state.running = Some(job.id());
        Some(job)
    }

    /// Clear the running slot if it belongs to `id`
    pub async fn finish(&self, id: JobId) {
        let mut state = self.state.lock().await;
        if state.running == Some(id) {
            state.running = None;
        } else {
            tracing::warn!("finish({}) called but running job is {:?}", id, state.running);
        }
    }

    /// Stop accepting jobs and drop the pending and running ones.
    ///
    /// Called once the worker has exited, so nothing is left holding the
    /// busy state. Returns the ids that were discarded.
    pub async fn close(&self) -> Vec<JobId> {
        let mut state = self.state.lock().await;
        state.closed = true;
        let mut dropped: Vec<JobId> = state.pending.drain(..).map(|job| job.id()).collect();
        dropped.extend(state.running.take());
        dropped
    }

    pub async fn running(&self) -> Option<JobId> {
        self.state.lock().await.running
    }

    /// Number of accepted jobs not yet picked up by the worker
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Resolve once a job has been enqueued since the last wake-up
    pub async fn wait_for_job(&self) {
        self.notify.notified().await;
    }
}

/// Trim and check that `url` is an absolute http(s) URL with a host
pub fn validate_url(url: &str) -> Result<String, EnqueueError> {
    let trimmed = url.trim();
    let invalid = |reason: &str| EnqueueError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("URL is empty"));
    }

    let parsed = url::Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("URL has no host"));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_enqueue_and_next() {
        let queue = JobQueue::new();
        let settings = Settings::default();

        let id = queue
            .enqueue("https://example.com/watch?v=1", false, &settings)
            .await
            .unwrap();
        assert_eq!(id, JobId::new(1));
        assert_eq!(queue.len().await, 1);
        assert!(queue.is_busy().await);

        let job = queue.next().await.unwrap();
        assert_eq!(job.id(), id);
        assert_eq!(job.url(), "https://example.com/watch?v=1");
        assert_eq!(queue.len().await, 0);
        assert_eq!(queue.running().await, Some(id));
        assert!(queue.is_busy().await);

        queue.finish(id).await;
        assert!(!queue.is_busy().await);
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_busy_rejection_leaves_queue_unchanged() {
        let queue = JobQueue::new();
        let settings = Settings::default();

        queue.enqueue("https://example.com/1", false, &settings).await.unwrap();
        let len_before = queue.len().await;

        let second = queue.enqueue("https://example.com/2", true, &settings).await;
        assert_eq!(second, Err(EnqueueError::Busy));
        assert_eq!(queue.len().await, len_before);

        // Still busy once the first job is running
        let job = queue.next().await.unwrap();
        assert_eq!(
            queue.enqueue("https://example.com/3", false, &settings).await,
            Err(EnqueueError::Busy)
        );

        queue.finish(job.id()).await;
        let next_id = queue
            .enqueue("https://example.com/4", false, &settings)
            .await
            .unwrap();
        assert_eq!(next_id, JobId::new(2));
    }

    #[tokio::test]
    async fn test_invalid_urls_rejected() {
        let queue = JobQueue::new();
        let settings = Settings::default();

        for bad in ["", "   ", "not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            let result = queue.enqueue(bad, false, &settings).await;
            assert!(
                matches!(result, Err(EnqueueError::InvalidUrl { .. })),
                "accepted {:?}",
                bad
            );
        }
        assert!(!queue.is_busy().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_changes() {
        let queue = JobQueue::new();
        let mut settings = Settings::default();
        settings.segments = 6;

        queue.enqueue("https://example.com/v", false, &settings).await.unwrap();
        settings.segments = 2;

        let job = queue.next().await.unwrap();
        assert_eq!(job.settings().segments, 6);
    }

    #[tokio::test]
    async fn test_wait_for_job_wakes_after_enqueue() {
        let queue = JobQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.wait_for_job().await;
                queue.next().await.map(|job| job.id())
            })
        };

        queue
            .enqueue("https://example.com/v", false, &Settings::default())
            .await
            .unwrap();

        assert_eq!(waiter.await.unwrap(), Some(JobId::new(1)));
    }

    #[tokio::test]
    async fn test_close_clears_busy_and_rejects_new_jobs() {
        let queue = JobQueue::new();
        let settings = Settings::default();

        let id = queue.enqueue("https://example.com/1", false, &settings).await.unwrap();
        assert_eq!(queue.close().await, vec![id]);
        assert!(!queue.is_busy().await);
        assert!(queue.next().await.is_none());

        assert_eq!(
            queue.enqueue("https://example.com/2", false, &settings).await,
            Err(EnqueueError::ShuttingDown)
        );
        assert!(!queue.is_busy().await);
    }

    #[test]
    fn test_validate_url_trims() {
        assert_eq!(
            validate_url("  https://example.com/x  ").unwrap(),
            "https://example.com/x"
        );
    }
}
