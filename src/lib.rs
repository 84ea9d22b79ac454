pub mod app;
pub mod auth;
pub mod cli;
pub mod download;
pub mod ipc;
pub mod util;

pub use app::config::{Settings, SettingsStore};
pub use app::orchestrator::{Orchestrator, OrchestratorOptions};
