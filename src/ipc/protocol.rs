/// IPC protocol messages exchanged between oxygen and its presentation clients.
///
/// Wire format: each message is a single JSON line terminated by `\n`.
use crate::app::config::{Coercion, OutputKind, Settings};
use crate::auth::CredentialEntry;
use crate::download::completion_log::LogEntry;
use crate::download::notifier::Event;
use crate::download::task::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default TCP listen address (loopback only)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:47800";

/// Request sent from a client to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    Enqueue {
        url: String,
        #[serde(default)]
        audio_only: bool,
    },
    LoadSettings,
    SetSetting {
        field: String,
        /// Any JSON scalar; converted to its textual form before validation
        value: serde_json::Value,
    },
    ResetSettings,
    BrowseOutput {
        kind: OutputKind,
    },
    OpenDownloadFolder,
    OpenLogsFolder,
    LoadLogs,
    ClearLogs,
    SaveCookie {
        domain: String,
        content: String,
    },
    SaveCredentials {
        domain: String,
        username: String,
        password: String,
    },
    ListAuth,
    DeleteAuth {
        domain: String,
        kind: String,
    },
    /// Start receiving `event` frames on this connection
    Subscribe,
    Ping,
}

/// Response sent from the orchestrator to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Enqueued {
        job_id: JobId,
    },
    Busy {
        message: String,
    },
    Invalid {
        message: String,
    },
    Settings {
        settings: Settings,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        coercion: Option<Coercion>,
    },
    Path {
        path: Option<PathBuf>,
    },
    Logs {
        entries: Vec<LogEntry>,
    },
    AuthEntries {
        entries: Vec<CredentialEntry>,
    },
    Saved {
        ok: bool,
    },
    Deleted {
        ok: bool,
    },
    Ok {
        message: String,
    },
    Error {
        message: String,
    },
    Pong,
    /// Pushed to subscribed connections
    Event {
        event: Event,
    },
}

/// Textual form of a `set_setting` value
pub fn setting_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
