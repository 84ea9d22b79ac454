//! Application façade wiring the stores, the queue and the worker together.
//!
//! Every request a presentation client can make is a method here; results
//! that other clients should see are also broadcast through the notifier.

use crate::app::config::{OutputKind, SetOutcome, SettingField, Settings, SettingsError, SettingsStore};
use crate::auth::{CredentialEntry, CredentialKind, CredentialStore};
use crate::download::completion_log::{LogEntry, LogStore};
use crate::download::engine::DownloadEngine;
use crate::download::notifier::{DEFAULT_EVENT_CAPACITY, Event, EventNotifier};
use crate::download::queue::{EnqueueError, JobQueue};
use crate::download::task::JobId;
use crate::download::worker::{DEFAULT_RETRY_DELAY, DownloadWorker};
use crate::util::host::{FolderOpener, FolderPicker, NativeFolderPicker, SystemFolderOpener};
use crate::util::paths::ConfigLayout;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct OrchestratorOptions {
    pub config_dir: PathBuf,
    pub engine: Arc<dyn DownloadEngine>,
    pub picker: Arc<dyn FolderPicker>,
    pub opener: Arc<dyn FolderOpener>,
    pub retry_delay: Duration,
    pub event_capacity: usize,
}

impl OrchestratorOptions {
    pub fn new(config_dir: impl Into<PathBuf>, engine: Arc<dyn DownloadEngine>) -> Self {
        Self {
            config_dir: config_dir.into(),
            engine,
            picker: Arc::new(NativeFolderPicker),
            opener: Arc::new(SystemFolderOpener),
            retry_delay: DEFAULT_RETRY_DELAY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_picker(mut self, picker: Arc<dyn FolderPicker>) -> Self {
        self.picker = picker;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn FolderOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

struct Inner {
    settings: Arc<Mutex<SettingsStore>>,
    credentials: Arc<CredentialStore>,
    logs: Arc<LogStore>,
    queue: JobQueue,
    notifier: EventNotifier,
    picker: Arc<dyn FolderPicker>,
    opener: Arc<dyn FolderOpener>,
    last_audio_only: AtomicBool,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to the running orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Open the stores under `options.config_dir` and spawn the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(options: OrchestratorOptions) -> Self {
        let config_dir = options.config_dir;
        let layout = ConfigLayout::new(&config_dir);
        let settings = SettingsStore::open(layout.settings_file());
        let credentials = Arc::new(CredentialStore::new(layout.auth_dir()));
        let logs = Arc::new(LogStore::new(layout.history_dir()));
        let queue = JobQueue::new();
        let notifier = EventNotifier::new(options.event_capacity);
        let cancel = CancellationToken::new();

        let worker = DownloadWorker::new(
            queue.clone(),
            options.engine,
            notifier.clone(),
            logs.clone(),
            credentials.clone(),
        )
        .with_retry_delay(options.retry_delay);
        let handle = tokio::spawn(worker.run(cancel.clone()));

        tracing::info!("Orchestrator started with config directory {:?}", config_dir);

        Self {
            inner: Arc::new(Inner {
                settings: Arc::new(Mutex::new(settings)),
                credentials,
                logs,
                queue,
                notifier,
                picker: options.picker,
                opener: options.opener,
                last_audio_only: AtomicBool::new(false),
                cancel,
                worker: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Accept a download, snapshotting the current settings
    pub async fn enqueue(&self, url: &str, audio_only: bool) -> Result<JobId, EnqueueError> {
        if self.inner.cancel.is_cancelled() {
            tracing::warn!("Rejected {:?}: orchestrator is shutting down", url);
            return Err(EnqueueError::ShuttingDown);
        }

        let snapshot = self.settings().await;
        let result = self.inner.queue.enqueue(url, audio_only, &snapshot).await;

        match &result {
            Ok(id) => {
                self.inner.last_audio_only.store(audio_only, Ordering::Relaxed);
                tracing::info!("Added to queue: {} ({})", url.trim(), id);
            }
            Err(e) => tracing::warn!("Rejected {:?}: {}", url, e),
        }
        result
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.queue.is_busy().await
    }

    pub async fn settings(&self) -> Settings {
        lock_store(&self.inner.settings).settings().clone()
    }

    /// Run `f` against the settings store on the blocking pool; every store
    /// operation that touches the file goes through here
    async fn with_store<T, F>(&self, f: F) -> Result<T, SettingsError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SettingsStore) -> T + Send + 'static,
    {
        let store = self.inner.settings.clone();
        Ok(tokio::task::spawn_blocking(move || {
            let mut guard = lock_store(&store);
            f(&mut guard)
        })
        .await?)
    }

    /// Re-read the settings file and broadcast the result
    pub async fn load_settings(&self) -> Settings {
        let settings = match self.with_store(|store| store.load()).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!("Failed to reload settings: {}", e);
                self.settings().await
            }
        };
        self.broadcast_settings(&settings);
        settings
    }

    /// Validate, store and broadcast one setting.
    ///
    /// Coerced values are reported in the outcome. The in-memory value is kept
    /// even when the file write fails, in which case the error is returned.
    pub async fn set_setting(&self, field: &str, value: &str) -> Result<SetOutcome, SettingsError> {
        let field: SettingField = field.parse()?;
        let value = value.to_string();
        let (result, snapshot) = self
            .with_store(move |store| {
                let result = store.set(field, &value);
                (result, store.settings().clone())
            })
            .await?;

        self.broadcast_settings(&snapshot);
        result
    }

    pub async fn reset_settings(&self) -> Result<Settings, SettingsError> {
        let (result, snapshot) = self
            .with_store(|store| {
                let result = store.reset();
                (result, store.settings().clone())
            })
            .await?;

        self.broadcast_settings(&snapshot);
        result.map(|_| snapshot)
    }

    /// Ask the picker for a new output folder of `kind` and store it.
    ///
    /// Returns `Ok(None)` when the user dismisses the dialog.
    pub async fn browse_output_path(&self, kind: OutputKind) -> Result<Option<PathBuf>, SettingsError> {
        let start = self.settings().await.output_dir(kind == OutputKind::Audio).to_path_buf();

        let title = match kind {
            OutputKind::Video => "Select video output folder",
            OutputKind::Audio => "Select audio output folder",
        };
        let Some(picked) = self.inner.picker.pick_folder(title, &start).await else {
            tracing::debug!("Output folder selection cancelled");
            return Ok(None);
        };

        let value = picked.to_string_lossy().into_owned();
        self.set_setting(kind.path_field().as_str(), &value).await?;
        Ok(Some(picked))
    }

    /// Open the output folder for the most recent job's kind, creating it first
    pub async fn open_download_folder(&self) -> Result<PathBuf> {
        let audio_only = self.inner.last_audio_only.load(Ordering::Relaxed);
        let dir = self.settings().await.output_dir(audio_only).to_path_buf();
        self.open_dir(dir).await
    }

    pub async fn open_logs_folder(&self) -> Result<PathBuf> {
        self.open_dir(self.inner.logs.dir().to_path_buf()).await
    }

    async fn open_dir(&self, dir: PathBuf) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {:?}", dir))?;
        self.inner.opener.open(&dir)?;
        Ok(dir)
    }

    /// Every stored entry with the number of day files read, off the runtime threads
    async fn read_log_files(&self) -> Result<(Vec<LogEntry>, usize)> {
        let logs = self.inner.logs.clone();
        tokio::task::spawn_blocking(move || -> Result<(Vec<LogEntry>, usize)> {
            let files = logs.day_files()?.len();
            Ok((logs.load_all()?, files))
        })
        .await?
    }

    /// Every stored entry, without notifying subscribers
    pub async fn read_logs(&self) -> Result<Vec<LogEntry>> {
        Ok(self.read_log_files().await?.0)
    }

    /// Read every stored entry and replay them to subscribers
    pub async fn load_logs(&self) -> Result<Vec<LogEntry>> {
        let (entries, files) = self.read_log_files().await?;

        self.inner.notifier.emit(Event::LogsCleared);
        for entry in &entries {
            self.inner.notifier.emit(Event::LogAppended { entry: entry.clone() });
        }
        self.inner
            .notifier
            .message(None, format!("Loaded logs from {} file(s)", files));

        tracing::info!("Loaded {} log entries from {} file(s)", entries.len(), files);
        Ok(entries)
    }

    pub async fn clear_logs(&self) -> Result<usize> {
        let logs = self.inner.logs.clone();
        let removed = tokio::task::spawn_blocking(move || logs.clear()).await??;
        self.inner.notifier.emit(Event::LogsCleared);
        Ok(removed)
    }

    pub fn save_cookie(&self, domain: &str, content: &str) -> bool {
        match self.inner.credentials.upsert_cookie(domain, content) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to save cookie for {:?}: {}", domain, e);
                false
            }
        }
    }

    pub fn save_credentials(&self, domain: &str, username: &str, password: &str) -> bool {
        match self.inner.credentials.upsert_password(domain, username, password) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to save login for {:?}: {}", domain, e);
                false
            }
        }
    }

    pub fn list_auth(&self) -> Vec<CredentialEntry> {
        self.inner.credentials.list().unwrap_or_else(|e| {
            tracing::error!("Failed to list credentials: {}", e);
            Vec::new()
        })
    }

    pub fn delete_auth(&self, domain: &str, kind: &str) -> bool {
        let kind: CredentialKind = match kind.parse() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("Delete rejected: {}", e);
                return false;
            }
        };

        self.inner.credentials.delete(domain, kind).unwrap_or_else(|e| {
            tracing::error!("Failed to delete {} credential for {:?}: {}", kind, domain, e);
            false
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.notifier.subscribe()
    }

    pub fn current_progress(&self) -> f64 {
        self.inner.notifier.current_progress()
    }

    /// Stop the worker, cancelling any running download, and wait for it
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Download worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Orchestrator stopped");
    }

    fn broadcast_settings(&self, settings: &Settings) {
        self.inner.notifier.emit(Event::Settings {
            settings: settings.clone(),
        });
    }
}

fn lock_store(store: &Mutex<SettingsStore>) -> std::sync::MutexGuard<'_, SettingsStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
