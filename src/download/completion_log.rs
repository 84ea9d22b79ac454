/// Completion logging functionality
///
/// Appends finished download attempts to daily JSONL files and reads them back
/// in append order. Log files are organized by date: {config_dir}/history/YYYYMMDD.jsonl

use super::task::JobId;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogResult {
    Success,
    Failed,
}

impl LogResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
        }
    }
}

/// One finished download attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub result: LogResult,
    /// Local completion time
    pub date: DateTime<Local>,
    pub url: String,
    /// Destination folder resolved from the job snapshot
    pub folder: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub audio_only: bool,
    /// Final file name (success only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Failure description (failure only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(result: LogResult, url: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            result,
            date: Local::now(),
            url: url.into(),
            folder: folder.into(),
            job_id: None,
            audio_only: false,
            filename: None,
            error: None,
        }
    }

    /// Timestamp in the `YYYY-MM-DD HH:MM:SS` form shown in tables
    pub fn display_date(&self) -> String {
        self.date.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Append-only store of [`LogEntry`] records
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one entry to today's file (UTC date), returning the file written
    pub fn append(&self, entry: &LogEntry) -> Result<PathBuf> {
        let json_line = serde_json::to_string(entry)?;

        let _guard = self.lock();
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create history directory {:?}", self.dir))?;

        let today = Utc::now().format("%Y%m%d").to_string();
        let log_file = self.dir.join(format!("{}.jsonl", today));

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open {:?}", log_file))?;

        writeln!(file, "{}", json_line)?;
        file.sync_all()?;

        tracing::debug!(
            "Appended completion log: {} {} to {}",
            entry.result.as_str(),
            entry.url,
            log_file.display()
        );

        Ok(log_file)
    }

    /// Day files in chronological order
    pub fn day_files(&self) -> Result<Vec<PathBuf>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.dir));
            }
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Lazily iterate every stored entry in append order.
    ///
    /// Each call starts from the beginning, so iterating again yields the same
    /// sequence until the next append or clear.
    pub fn entries(&self) -> Result<LogEntries> {
        Ok(LogEntries {
            files: self.day_files()?.into_iter(),
            current: None,
        })
    }

    pub fn load_all(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries()?.collect())
    }

    /// Delete every day file, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock();
        let files = self.day_files()?;
        for file in &files {
            std::fs::remove_file(file).with_context(|| format!("Failed to remove {:?}", file))?;
        }
        tracing::info!("Cleared {} completion log file(s)", files.len());
        Ok(files.len())
    }
}

/// Iterator over stored entries; malformed lines are skipped with a warning
pub struct LogEntries {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>)>,
}

impl Iterator for LogEntries {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        loop {
            if let Some((path, lines)) = self.current.as_mut() {
                match lines.next() {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<LogEntry>(&line) {
                            Ok(entry) => return Some(entry),
                            Err(e) => {
                                tracing::warn!("Failed to parse completion entry in {:?}: {}", path, e);
                                continue;
                            }
                        }
                    }
                    Some(Err(e)) => tracing::warn!("Failed to read {:?}: {}", path, e),
                    None => {}
                }
                self.current = None;
            }

            let path = self.files.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some((path, BufReader::new(file).lines())),
                Err(e) => tracing::warn!("Failed to open {:?}: {}", path, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(result: LogResult, url: &str) -> LogEntry {
        LogEntry::new(result, url, "/downloads")
    }

    #[test]
    fn test_entry_serialization() {
        let mut e = entry(LogResult::Success, "https://example.com/v");
        e.filename = Some("clip.mp4".to_string());

        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"result\":\"Success\""));
        assert!(json.contains("\"url\":\"https://example.com/v\""));
        assert!(json.contains("\"filename\":\"clip.mp4\""));
        assert!(!json.contains("\"error\""));
        assert!(!json.contains('\n'));

        let failed = serde_json::to_string(&entry(LogResult::Failed, "u")).unwrap();
        assert!(failed.contains("\"result\":\"Failed\""));
    }

    #[test]
    fn test_minimal_entry_loads() {
        let json = r#"{"result":"Failed","date":"2024-05-01T10:00:00+00:00","url":"https://x.org","folder":"/tmp"}"#;
        let e: LogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(e.result, LogResult::Failed);
        assert_eq!(e.job_id, None);
        assert!(!e.audio_only);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(temp_dir.path().join("history"));

        let urls: Vec<String> = (0..5).map(|i| format!("https://example.com/{}", i)).collect();
        for (i, url) in urls.iter().enumerate() {
            let result = if i % 2 == 0 { LogResult::Success } else { LogResult::Failed };
            store.append(&entry(result, url)).unwrap();
        }

        let loaded: Vec<String> = store.load_all().unwrap().into_iter().map(|e| e.url).collect();
        assert_eq!(loaded, urls);

        // Restartable: a second pass yields the same sequence
        let again: Vec<String> = store.entries().unwrap().map(|e| e.url).collect();
        assert_eq!(again, urls);

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_files_read_in_date_order_and_bad_lines_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let store = LogStore::new(&dir);

        let older = serde_json::to_string(&entry(LogResult::Success, "https://a.example")).unwrap();
        let newer = serde_json::to_string(&entry(LogResult::Failed, "https://b.example")).unwrap();
        std::fs::write(dir.join("20240102.jsonl"), format!("{}\nnot json\n\n", newer)).unwrap();
        std::fs::write(dir.join("20240101.jsonl"), format!("{}\n", older)).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let urls: Vec<String> = store.load_all().unwrap().into_iter().map(|e| e.url).collect();
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
        assert_eq!(store.day_files().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(temp_dir.path().join("never-created"));
        assert!(store.load_all().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }
}
