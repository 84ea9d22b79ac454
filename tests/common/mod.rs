use async_trait::async_trait;
use oxygen::app::orchestrator::{Orchestrator, OrchestratorOptions};
use oxygen::download::engine::{DownloadEngine, EngineError, EngineOutput, EngineProgress, EngineRequest};
use oxygen::download::engine_errors::FailureInfo;
use oxygen::download::notifier::Event;
use oxygen::download::task::JobId;
use oxygen::util::host::{FolderOpener, FolderPicker};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

// Initialize logging once for all tests
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// One scripted engine attempt
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Step {
    Succeed {
        progress: Vec<f64>,
        file: Option<PathBuf>,
    },
    Fail(FailureInfo),
    /// Report progress, then run until cancelled
    Hang { progress: Vec<f64> },
}

impl Step {
    #[allow(dead_code)]
    pub fn ok() -> Self {
        Self::Succeed {
            progress: Vec::new(),
            file: None,
        }
    }

    #[allow(dead_code)]
    pub fn network_error() -> Self {
        Self::Fail(FailureInfo::classify(
            "ERROR: Unable to download webpage: <urlopen error timed out>",
            Some(1),
        ))
    }
}

/// Engine that plays back scripted attempts and records every request.
///
/// Once the script runs out, attempts succeed without progress.
#[derive(Default)]
pub struct FakeEngine {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<EngineRequest>>,
}

#[allow(dead_code)]
impl FakeEngine {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(
        &self,
        request: &EngineRequest,
        progress: mpsc::Sender<EngineProgress>,
        cancel: CancellationToken,
    ) -> Result<EngineOutput, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(Step::ok);

        match step {
            Step::Succeed { progress: values, file } => {
                for value in values {
                    let _ = progress.send(EngineProgress::Fraction(value)).await;
                }
                Ok(EngineOutput { file })
            }
            Step::Fail(info) => Err(EngineError::Failed(info)),
            Step::Hang { progress: values } => {
                for value in values {
                    let _ = progress.send(EngineProgress::Fraction(value)).await;
                }
                cancel.cancelled().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}

/// Picker returning a fixed answer
pub struct FixedPicker(pub Option<PathBuf>);

#[async_trait]
impl FolderPicker for FixedPicker {
    async fn pick_folder(&self, _title: &str, _start: &Path) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Opener that records paths instead of launching a file manager
#[derive(Default)]
pub struct RecordingOpener {
    opened: Mutex<Vec<PathBuf>>,
}

#[allow(dead_code)]
impl RecordingOpener {
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl FolderOpener for RecordingOpener {
    fn open(&self, path: &Path) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// An orchestrator running against a temp config dir and a fake engine
pub struct Harness {
    pub dir: TempDir,
    pub orchestrator: Orchestrator,
    pub engine: Arc<FakeEngine>,
    pub opener: Arc<RecordingOpener>,
}

#[allow(dead_code)]
impl Harness {
    pub async fn start(engine: FakeEngine) -> Self {
        Self::start_with_picker(engine, None).await
    }

    pub async fn start_with_picker(engine: FakeEngine, picked: Option<PathBuf>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let opener = Arc::new(RecordingOpener::default());

        let options = OrchestratorOptions::new(dir.path().join("config"), engine.clone())
            .with_picker(Arc::new(FixedPicker(picked)))
            .with_opener(opener.clone())
            .with_retry_delay(Duration::ZERO);
        let orchestrator = Orchestrator::start(options);

        // Keep downloads inside the temp dir
        let videos = dir.path().join("videos");
        let music = dir.path().join("music");
        orchestrator
            .set_setting("video_output_path", videos.to_str().unwrap())
            .await
            .unwrap();
        orchestrator
            .set_setting("audio_output_path", music.to_str().unwrap())
            .await
            .unwrap();

        Self {
            dir,
            orchestrator,
            engine,
            opener,
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    pub fn video_dir(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    pub fn music_dir(&self) -> PathBuf {
        self.dir.path().join("music")
    }

    /// Enqueue and wait for the job's reset signal, returning its events
    pub async fn run_job(&self, url: &str, audio_only: bool) -> (JobId, Vec<Event>) {
        let mut rx = self.orchestrator.subscribe();
        let id = self.orchestrator.enqueue(url, audio_only).await.unwrap();
        let events = collect_job_events(&mut rx, id).await;
        (id, events)
    }
}

/// Events belonging to `id`, up to and including its `DownloadReset`
#[allow(dead_code)]
pub async fn collect_job_events(rx: &mut broadcast::Receiver<Event>, id: JobId) -> Vec<Event> {
    let collect = async {
        let mut events = Vec::new();
        loop {
            let event = rx.recv().await.expect("event stream ended");
            let belongs = match &event {
                Event::JobStarted { job_id, .. } | Event::Progress { job_id, .. } => *job_id == id,
                Event::Message { job_id, .. } | Event::DownloadReset { job_id } => *job_id == Some(id),
                Event::LogAppended { entry } => entry.job_id == Some(id),
                Event::LogsCleared | Event::Settings { .. } => false,
            };
            if !belongs {
                continue;
            }
            let done = matches!(event, Event::DownloadReset { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("job did not finish in time")
}

/// Wait until `event` matches `pred`
#[allow(dead_code)]
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<Event>, pred: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed in time")
}

/// Progress fractions in emission order
#[allow(dead_code)]
pub fn progress_values(events: &[Event]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect()
}
