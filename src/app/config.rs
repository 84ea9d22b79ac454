//! Persistent download settings (saved to `<config>/settings.toml`).
//!
//! Every field has a default. Values arriving from the request surface or from
//! disk are validated field by field; anything out of range is replaced by its
//! default and the replacement is reported back as a [`Coercion`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static BUFFER_SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d+[KMG]?$").expect("Invalid regex pattern"));

pub const DEFAULT_SEGMENTS: u8 = 4;
pub const DEFAULT_RETRIES: u32 = 5;
pub const DEFAULT_BUFFER_SIZE: &str = "16M";
/// Applied when a buffer size fails validation (smaller than the fresh-install default)
pub const FALLBACK_BUFFER_SIZE: &str = "1M";
pub const MAX_SEGMENTS: u8 = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownField(String),

    #[error("failed to persist settings to {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode settings: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("settings task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoQuality {
    #[default]
    Best,
    High,
    Medium,
    Low,
    Worst,
}

impl VideoQuality {
    pub const ALL: [VideoQuality; 5] = [Self::Best, Self::High, Self::Medium, Self::Low, Self::Worst];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "Best",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Worst => "Worst",
        }
    }

    /// yt-dlp `-f` selector for this quality
    pub fn format_selector(&self) -> &'static str {
        match self {
            Self::Best => "bestvideo+bestaudio/best",
            Self::High => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            Self::Medium => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            Self::Low => "bestvideo[height<=480]+bestaudio/best[height<=480]",
            Self::Worst => "worstvideo+worstaudio/worst",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Auto,
    Mp4,
    Webm,
}

impl VideoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Auto,
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }
}

/// Which output folder a path setting refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Video,
    Audio,
}

impl OutputKind {
    pub fn path_field(&self) -> SettingField {
        match self {
            Self::Video => SettingField::VideoOutputPath,
            Self::Audio => SettingField::AudioOutputPath,
        }
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            other => Err(format!("unknown output kind '{}' (expected video or audio)", other)),
        }
    }
}

/// The enumerated option set accepted by [`SettingsStore::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingField {
    VideoQuality,
    VideoFormat,
    VideoOutputPath,
    AudioFormat,
    AudioOutputPath,
    Proxy,
    Sublangs,
    WriteThumbnail,
    EmbedThumbnail,
    Segments,
    Retries,
    BufferSize,
}

impl SettingField {
    pub const ALL: [SettingField; 12] = [
        Self::VideoQuality,
        Self::VideoFormat,
        Self::VideoOutputPath,
        Self::AudioFormat,
        Self::AudioOutputPath,
        Self::Proxy,
        Self::Sublangs,
        Self::WriteThumbnail,
        Self::EmbedThumbnail,
        Self::Segments,
        Self::Retries,
        Self::BufferSize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoQuality => "video_quality",
            Self::VideoFormat => "video_format",
            Self::VideoOutputPath => "video_output_path",
            Self::AudioFormat => "audio_format",
            Self::AudioOutputPath => "audio_output_path",
            Self::Proxy => "proxy",
            Self::Sublangs => "sublangs",
            Self::WriteThumbnail => "write_thumbnail",
            Self::EmbedThumbnail => "embed_thumbnail",
            Self::Segments => "segments",
            Self::Retries => "retries",
            Self::BufferSize => "buffer_size",
        }
    }
}

impl fmt::Display for SettingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingField {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SettingsError::UnknownField(wanted.to_string()))
    }
}

/// A rejected value and the default that replaced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coercion {
    pub field: SettingField,
    pub rejected: String,
    pub applied: String,
}

impl fmt::Display for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid value '{}' for {}, using '{}'",
            self.rejected, self.field, self.applied
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Accepted,
    Coerced(Coercion),
}

impl SetOutcome {
    pub fn coercion(&self) -> Option<&Coercion> {
        match self {
            Self::Accepted => None,
            Self::Coerced(c) => Some(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub video_quality: VideoQuality,
    pub video_format: VideoFormat,
    pub video_output_path: PathBuf,
    pub audio_format: AudioFormat,
    pub audio_output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sublangs: Option<String>,
    pub write_thumbnail: bool,
    pub embed_thumbnail: bool,
    pub segments: u8,
    pub retries: u32,
    pub buffer_size: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            video_quality: VideoQuality::default(),
            video_format: VideoFormat::default(),
            video_output_path: crate::util::paths::default_video_output_dir(),
            audio_format: AudioFormat::default(),
            audio_output_path: crate::util::paths::default_audio_output_dir(),
            proxy: None,
            sublangs: None,
            write_thumbnail: false,
            embed_thumbnail: false,
            segments: DEFAULT_SEGMENTS,
            retries: DEFAULT_RETRIES,
            buffer_size: DEFAULT_BUFFER_SIZE.to_string(),
        }
    }
}

impl Settings {
    /// Output folder for a job of the given kind
    pub fn output_dir(&self, audio_only: bool) -> &Path {
        if audio_only {
            &self.audio_output_path
        } else {
            &self.video_output_path
        }
    }

    /// Current value of a field in its textual form
    pub fn value_of(&self, field: SettingField) -> String {
        match field {
            SettingField::VideoQuality => self.video_quality.as_str().to_string(),
            SettingField::VideoFormat => self.video_format.as_str().to_string(),
            SettingField::VideoOutputPath => self.video_output_path.display().to_string(),
            SettingField::AudioFormat => self.audio_format.as_str().to_string(),
            SettingField::AudioOutputPath => self.audio_output_path.display().to_string(),
            SettingField::Proxy => self.proxy.clone().unwrap_or_default(),
            SettingField::Sublangs => self.sublangs.clone().unwrap_or_default(),
            SettingField::WriteThumbnail => self.write_thumbnail.to_string(),
            SettingField::EmbedThumbnail => self.embed_thumbnail.to_string(),
            SettingField::Segments => self.segments.to_string(),
            SettingField::Retries => self.retries.to_string(),
            SettingField::BufferSize => self.buffer_size.clone(),
        }
    }

    /// Validate `raw` for `field` and store it, or store the field default.
    ///
    /// Only `field` is touched.
    pub fn apply(&mut self, field: SettingField, raw: &str) -> SetOutcome {
        let value = raw.trim();
        let accepted = match field {
            SettingField::VideoQuality => VideoQuality::parse(value)
                .map(|q| self.video_quality = q)
                .ok_or_else(|| self.video_quality = VideoQuality::default()),
            SettingField::VideoFormat => VideoFormat::parse(value)
                .map(|f| self.video_format = f)
                .ok_or_else(|| self.video_format = VideoFormat::default()),
            SettingField::AudioFormat => AudioFormat::parse(value)
                .map(|f| self.audio_format = f)
                .ok_or_else(|| self.audio_format = AudioFormat::default()),
            SettingField::VideoOutputPath => {
                if value.is_empty() {
                    self.video_output_path = crate::util::paths::default_video_output_dir();
                    Err(())
                } else {
                    self.video_output_path = PathBuf::from(value);
                    Ok(())
                }
            }
            SettingField::AudioOutputPath => {
                if value.is_empty() {
                    self.audio_output_path = crate::util::paths::default_audio_output_dir();
                    Err(())
                } else {
                    self.audio_output_path = PathBuf::from(value);
                    Ok(())
                }
            }
            SettingField::Proxy => {
                self.proxy = non_empty(value);
                Ok(())
            }
            SettingField::Sublangs => {
                self.sublangs = non_empty(value);
                Ok(())
            }
            SettingField::WriteThumbnail => parse_bool(value)
                .map(|b| self.write_thumbnail = b)
                .ok_or_else(|| self.write_thumbnail = false),
            SettingField::EmbedThumbnail => parse_bool(value)
                .map(|b| self.embed_thumbnail = b)
                .ok_or_else(|| self.embed_thumbnail = false),
            SettingField::Segments => value
                .parse::<u8>()
                .ok()
                .filter(|n| (1..=MAX_SEGMENTS).contains(n))
                .map(|n| self.segments = n)
                .ok_or_else(|| self.segments = DEFAULT_SEGMENTS),
            SettingField::Retries => value
                .parse::<u32>()
                .map(|n| self.retries = n)
                .map_err(|_| self.retries = DEFAULT_RETRIES),
            SettingField::BufferSize => {
                if BUFFER_SIZE_PATTERN.is_match(value) {
                    self.buffer_size = value.to_string();
                    Ok(())
                } else {
                    self.buffer_size = FALLBACK_BUFFER_SIZE.to_string();
                    Err(())
                }
            }
        };

        match accepted {
            Ok(()) => SetOutcome::Accepted,
            Err(()) => SetOutcome::Coerced(Coercion {
                field,
                rejected: raw.to_string(),
                applied: self.value_of(field),
            }),
        }
    }

    /// Build settings from a parsed TOML table, validating each known field.
    ///
    /// Missing fields keep their defaults; unknown keys are ignored.
    pub fn from_table(table: &toml::Table) -> (Self, Vec<Coercion>) {
        let mut settings = Self::default();
        let mut coercions = Vec::new();

        for field in SettingField::ALL {
            let Some(value) = table.get(field.as_str()) else {
                continue;
            };
            let raw = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let SetOutcome::Coerced(c) = settings.apply(field, &raw) {
                coercions.push(c);
            }
        }

        (settings, coercions)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings bound to their backing file
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    current: Settings,
}

impl SettingsStore {
    /// Open the store at `path`, loading whatever is there
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = Self::read(&path);
        Self { path, current }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.current
    }

    /// Re-read the backing file. Never fails: absent or corrupt storage yields defaults.
    pub fn load(&mut self) -> Settings {
        self.current = Self::read(&self.path);
        self.current.clone()
    }

    /// Validate and store a single field, then persist.
    ///
    /// The in-memory value is updated even when persisting fails.
    pub fn set(&mut self, field: SettingField, value: &str) -> Result<SetOutcome, SettingsError> {
        let outcome = self.current.apply(field, value);
        match &outcome {
            SetOutcome::Accepted => tracing::info!("Setting {} = {:?}", field, value),
            SetOutcome::Coerced(c) => tracing::warn!("Setting coerced: {}", c),
        }
        self.save()?;
        Ok(outcome)
    }

    /// Restore every default and persist
    pub fn reset(&mut self) -> Result<Settings, SettingsError> {
        self.current = Settings::default();
        tracing::info!("Settings reset to defaults");
        self.save()?;
        Ok(self.current.clone())
    }

    fn read(path: &Path) -> Settings {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Settings file not found at {:?}, using defaults", path);
                return Settings::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read settings {:?}: {}, using defaults", path, e);
                return Settings::default();
            }
        };

        let table: toml::Table = match toml::from_str(&content) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Failed to parse settings {:?}: {}, using defaults", path, e);
                return Settings::default();
            }
        };

        let (settings, coercions) = Settings::from_table(&table);
        for c in &coercions {
            tracing::warn!("Stored setting coerced: {}", c);
        }
        settings
    }

    fn save(&self) -> Result<(), SettingsError> {
        let storage = |source: std::io::Error| SettingsError::Storage {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }

        let content = toml::to_string_pretty(&self.current)?;

        // Atomic write using temp file + rename
        let temp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content).map_err(storage)?;
        std::fs::rename(&temp_path, &self.path).map_err(storage)?;

        tracing::debug!("Saved settings to {:?}", self.path);
        Ok(())
    }
}
