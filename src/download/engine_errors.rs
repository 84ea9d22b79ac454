use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static HTTP_STATUS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)HTTP Error (\d{3})").expect("Invalid regex pattern"));

/// Engine failure category for user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Network,     // Connection errors, timeouts
    RateLimit,   // 429 / throttling
    Server,      // 5xx
    Auth,        // Login or cookies required / rejected
    Unsupported, // URL not handled by the engine
    Unavailable, // Removed, private, geo-blocked, 404
    Format,      // Requested format not offered
    Tooling,     // Engine or post-processor missing / failed to start
    Unknown,
}

/// Classified engine failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub category: FailureCategory,
    pub description: String,
    pub suggestion: String,
    /// Most relevant line of engine output
    pub detail: String,
    pub is_retryable: bool,
}

impl FailureInfo {
    fn new(category: FailureCategory, description: &str, suggestion: &str, detail: &str) -> Self {
        Self {
            category,
            description: description.to_string(),
            suggestion: suggestion.to_string(),
            detail: detail.to_string(),
            is_retryable: matches!(
                category,
                FailureCategory::Network | FailureCategory::RateLimit | FailureCategory::Server
            ),
        }
    }

    /// Create from an HTTP status reported by the engine
    pub fn from_status(status: u16, detail: &str) -> Self {
        match status {
            401 | 403 => Self::new(
                FailureCategory::Auth,
                if status == 401 { "Unauthorized" } else { "Forbidden" },
                "Access denied. Save a cookie file or login for this site.",
                detail,
            ),
            404 | 410 => Self::new(
                FailureCategory::Unavailable,
                "Not Found",
                "The media no longer exists at this URL.",
                detail,
            ),
            429 => Self::new(
                FailureCategory::RateLimit,
                "Too Many Requests",
                "Rate limited. Retry will happen automatically with delay.",
                detail,
            ),
            500..=599 => Self::new(
                FailureCategory::Server,
                "Server Error",
                "Server-side issue. Retry may succeed.",
                detail,
            ),
            _ => Self::new(
                FailureCategory::Unknown,
                "HTTP Error",
                "Check the URL and engine output for details.",
                detail,
            ),
        }
    }

    /// Engine could not be started or a required tool is missing
    pub fn tooling(detail: &str) -> Self {
        Self::new(
            FailureCategory::Tooling,
            "Tooling Error",
            "Check that yt-dlp and ffmpeg are installed and on PATH.",
            detail,
        )
    }

    /// Classify a failed run from its stderr and exit code
    pub fn classify(stderr: &str, exit_code: Option<i32>) -> Self {
        let detail = relevant_line(stderr)
            .map(str::to_string)
            .unwrap_or_else(|| match exit_code {
                Some(code) => format!("engine exited with status {}", code),
                None => "engine terminated by signal".to_string(),
            });
        let lower = detail.to_lowercase();

        if let Some(status) = HTTP_STATUS_PATTERN
            .captures(&detail)
            .and_then(|c| c[1].parse::<u16>().ok())
        {
            return Self::from_status(status, &detail);
        }

        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["unsupported url"]) {
            Self::new(
                FailureCategory::Unsupported,
                "Unsupported URL",
                "This site is not supported by the download engine.",
                &detail,
            )
        } else if has(&[
            "requested format is not available",
            "no video formats found",
            "format is not available",
        ]) {
            Self::new(
                FailureCategory::Format,
                "Format Unavailable",
                "Choose a different quality or format.",
                &detail,
            )
        } else if has(&[
            "sign in",
            "login required",
            "logged-in",
            "authentication",
            "cookies",
            "members-only",
            "private video",
        ]) {
            Self::new(
                FailureCategory::Auth,
                "Authentication Required",
                "Save a cookie file or login for this site.",
                &detail,
            )
        } else if has(&[
            "video unavailable",
            "has been removed",
            "not available in your country",
            "geo restrict",
            "this video is unavailable",
        ]) {
            Self::new(
                FailureCategory::Unavailable,
                "Media Unavailable",
                "The media was removed or is blocked in this region.",
                &detail,
            )
        } else if has(&["too many requests", "rate limit", "rate-limit"]) {
            Self::from_status(429, &detail)
        } else if has(&["ffmpeg", "ffprobe", "postprocessing"]) {
            Self::tooling(&detail)
        } else if has(&[
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "connection aborted",
            "temporary failure in name resolution",
            "network is unreachable",
            "unable to download webpage",
            "incompleteread",
            "ssl",
        ]) {
            Self::new(
                FailureCategory::Network,
                "Network Error",
                "Connection failed. Check network connectivity.",
                &detail,
            )
        } else {
            Self::new(
                FailureCategory::Unknown,
                "Download Error",
                "See the engine output for details.",
                &detail,
            )
        }
    }

    /// Format for display
    pub fn format(&self) -> String {
        format!("{}: {}", self.description, self.detail)
    }
}

/// Last `ERROR:` line of the output, or the last non-empty line
fn relevant_line(output: &str) -> Option<&str> {
    let lines = || output.lines().map(str::trim).filter(|l| !l.is_empty());
    lines()
        .filter(|l| l.starts_with("ERROR:"))
        .last()
        .or_else(|| lines().last())
}
