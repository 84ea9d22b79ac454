//! Fan-out of orchestrator events to any number of observers.
//!
//! Sending never blocks and never fails the sender: with no subscribers the
//! event is dropped, and a slow subscriber loses its oldest events instead of
//! holding up the worker.

use super::completion_log::LogEntry;
use super::task::JobId;
use crate::app::config::Settings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobStarted {
        job_id: JobId,
        url: String,
        audio_only: bool,
    },
    Progress {
        job_id: JobId,
        fraction: f64,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        text: String,
    },
    LogAppended {
        entry: LogEntry,
    },
    LogsCleared,
    Settings {
        settings: Settings,
    },
    DownloadReset {
        job_id: Option<JobId>,
    },
}

#[derive(Clone)]
pub struct EventNotifier {
    tx: broadcast::Sender<Event>,
    // f64 bits of the active job's progress
    progress: Arc<AtomicU64>,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            progress: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Progress of the running job, 0.0 when idle
    pub fn current_progress(&self) -> f64 {
        f64::from_bits(self.progress.load(Ordering::Acquire))
    }

    pub fn emit(&self, event: Event) {
        match &event {
            Event::Progress { fraction, .. } => {
                self.progress.store(fraction.to_bits(), Ordering::Release);
            }
            Event::DownloadReset { .. } => {
                self.progress.store(0f64.to_bits(), Ordering::Release);
            }
            _ => {}
        }

        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    pub fn message(&self, job_id: Option<JobId>, text: impl Into<String>) {
        self.emit(Event::Message {
            job_id,
            text: text.into(),
        });
    }
}
