use super::engine_errors::FailureCategory;
use crate::app::config::Settings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Process-local job identifier, allocated in increasing order by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single accepted download request.
///
/// The settings snapshot is taken when the job is accepted and cannot change
/// afterwards; the worker reads only this snapshot.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    id: JobId,
    url: String,
    audio_only: bool,
    settings: Arc<Settings>,
}

impl DownloadJob {
    pub(crate) fn new(id: JobId, url: String, audio_only: bool, settings: Arc<Settings>) -> Self {
        Self {
            id,
            url,
            audio_only,
            settings,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn audio_only(&self) -> bool {
        self.audio_only
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Destination folder resolved from the snapshot
    pub fn output_dir(&self) -> &Path {
        self.settings.output_dir(self.audio_only)
    }

    /// Lowercased host of the source URL
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

/// Terminal result of processing one job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success {
        file: Option<PathBuf>,
        attempts: u32,
    },
    Failed {
        error: String,
        category: FailureCategory,
        attempts: u32,
    },
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_accessors() {
        let mut settings = Settings::default();
        settings.audio_output_path = PathBuf::from("/music");
        settings.video_output_path = PathBuf::from("/videos");
        let settings = Arc::new(settings);

        let video = DownloadJob::new(
            JobId::new(1),
            "https://Media.Example.com/watch?v=abc".to_string(),
            false,
            settings.clone(),
        );
        assert_eq!(video.output_dir(), Path::new("/videos"));
        assert_eq!(video.host().as_deref(), Some("media.example.com"));

        let audio = DownloadJob::new(JobId::new(2), "https://example.com/a".to_string(), true, settings);
        assert_eq!(audio.output_dir(), Path::new("/music"));
        assert!(audio.id() > video.id());
    }

    #[test]
    fn test_job_id_display_and_serde() {
        assert_eq!(JobId::new(7).to_string(), "#7");
        assert_eq!(serde_json::to_string(&JobId::new(7)).unwrap(), "7");
    }
}
