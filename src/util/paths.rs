//! Where oxygen keeps its state.
//!
//! Everything lives under one config directory, laid out by [`ConfigLayout`]:
//!
//! ```text
//! <config>/settings.toml
//! <config>/auth/{cookies,passwords}/
//! <config>/history/YYYYMMDD.jsonl
//! <config>/.logs/app.jsonl.*
//! ```

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable naming the config directory
pub const CONFIG_DIR_ENV: &str = "OXYGEN_CONFIG_DIR";

/// Folder name used under the platform video/music directories
const OUTPUT_FOLDER_NAME: &str = "oxygen2";

/// How the config directory was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Flag,
    Env,
    User,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => write!(f, "--config"),
            Self::Env => write!(f, "{}", CONFIG_DIR_ENV),
            Self::User => write!(f, "user config directory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    root: PathBuf,
}

impl ConfigLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pick the config directory: `--config`, then `OXYGEN_CONFIG_DIR`, then
    /// the platform user config dir (`~/.config/oxygen`, `%APPDATA%\oxygen`).
    ///
    /// The chosen directory and its log folder are created if missing.
    pub fn resolve(flag: Option<PathBuf>) -> Result<(Self, ConfigSource)> {
        let (root, source) = match flag {
            Some(path) => (path, ConfigSource::Flag),
            None => match std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
                Some(path) => (PathBuf::from(path), ConfigSource::Env),
                None => (user_config_dir()?, ConfigSource::User),
            },
        };

        let layout = Self::new(root);
        layout.ensure()?;
        Ok((layout, source))
    }

    fn ensure(&self) -> Result<()> {
        let logs = self.logs_dir();
        std::fs::create_dir_all(&logs)
            .with_context(|| format!("Failed to create config directory {:?}", logs))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    /// Credential store root
    pub fn auth_dir(&self) -> PathBuf {
        self.root.join("auth")
    }

    /// Completion history (day files)
    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    /// Application trace logs, kept apart from the completion history
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(".logs")
    }
}

fn user_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine user config directory")?;
    Ok(base.join("oxygen"))
}

/// Default destination for video downloads.
///
/// `~/Movies/oxygen2` on macOS, `<Videos>/oxygen2` elsewhere. Falls back to the
/// home directory, then to a relative path, when the platform folders are unknown.
pub fn default_video_output_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    let base = dirs::home_dir().map(|home| home.join("Movies"));
    #[cfg(not(target_os = "macos"))]
    let base = dirs::video_dir().or_else(|| dirs::home_dir().map(|home| home.join("Videos")));

    base.unwrap_or_else(|| PathBuf::from("Videos"))
        .join(OUTPUT_FOLDER_NAME)
}

/// Default destination for audio downloads (`<Music>/oxygen2`)
pub fn default_audio_output_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("Music"))
        .join(OUTPUT_FOLDER_NAME)
}
