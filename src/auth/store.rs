//! Credential store: one file per (domain, kind) entry under `<config>/auth/`.
//!
//! Layout:
//! - `cookies/<domain>.cookie` raw cookie text, handed to the engine as-is
//! - `cookies/<domain>.toml` status and timestamp of the cookie entry
//! - `passwords/<domain>.toml` username, password, status and timestamp

use super::naming::entry_file_stem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),

    #[error("{0} is empty or unreadable")]
    Unreadable(&'static str),

    #[error("credential storage failure at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode credential record: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Cookie,
    Password,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" | "cookies" => Ok(Self::Cookie),
            "password" | "pass" => Ok(Self::Password),
            other => Err(format!("unknown credential kind '{}' (expected cookie or password)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Success,
    Failure,
}

impl fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failure => f.write_str("failure"),
        }
    }
}

/// Listing view of a stored credential. Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub domain: String,
    pub kind: CredentialKind,
    pub status: CredentialStatus,
    pub updated_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// Credentials applicable to one job, most specific domain first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCredentials {
    pub cookie: Option<(String, PathBuf)>,
    pub login: Option<(String, Login)>,
}

impl ResolvedCredentials {
    pub fn is_empty(&self) -> bool {
        self.cookie.is_none() && self.login.is_none()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CookieMeta {
    domain: String,
    status: CredentialStatus,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct PasswordRecord {
    domain: String,
    username: String,
    password: String,
    status: CredentialStatus,
    updated_at: DateTime<Utc>,
}

/// Reduce user input (bare host or full URL) to a lowercase host name
pub fn normalize_domain(input: &str) -> Result<String, AuthError> {
    let trimmed = input.trim();
    let invalid = || AuthError::InvalidDomain(input.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let parsed = if trimmed.contains("://") {
        url::Url::parse(trimmed).map_err(|_| invalid())?
    } else {
        if trimmed.contains(['/', '\\', '?', '#', '@']) || trimmed.contains(char::is_whitespace) {
            return Err(invalid());
        }
        url::Url::parse(&format!("https://{}", trimmed)).map_err(|_| invalid())?
    };

    let host = parsed
        .host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .ok_or_else(invalid)?;

    Ok(host)
}

/// Candidate entry domains for a job host: the host itself, then each parent
/// domain with at least two labels.
fn domain_candidates(host: &str) -> Vec<&str> {
    let mut candidates = vec![host];
    let mut rest = host;
    while let Some((_, parent)) = rest.split_once('.') {
        if !parent.contains('.') {
            break;
        }
        candidates.push(parent);
        rest = parent;
    }
    candidates
}

#[derive(Debug)]
pub struct CredentialStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn cookies_dir(&self) -> PathBuf {
        self.root.join("cookies")
    }

    fn passwords_dir(&self) -> PathBuf {
        self.root.join("passwords")
    }

    fn cookie_path(&self, domain: &str) -> PathBuf {
        self.cookies_dir()
            .join(format!("{}.cookie", entry_file_stem(domain)))
    }

    fn cookie_meta_path(&self, domain: &str) -> PathBuf {
        self.cookies_dir().join(format!("{}.toml", entry_file_stem(domain)))
    }

    fn password_path(&self, domain: &str) -> PathBuf {
        self.passwords_dir()
            .join(format!("{}.toml", entry_file_stem(domain)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store (or overwrite) the cookie entry for `domain`
    pub fn upsert_cookie(&self, domain: &str, content: &str) -> Result<CredentialEntry, AuthError> {
        let domain = normalize_domain(domain)?;
        if content.trim().is_empty() {
            return Err(AuthError::Unreadable("cookie content"));
        }

        let _guard = self.lock();
        let cookie_path = self.cookie_path(&domain);
        write_atomic(&cookie_path, content.as_bytes())?;

        let meta = CookieMeta {
            domain: domain.clone(),
            status: CredentialStatus::Success,
            updated_at: Utc::now(),
        };
        write_atomic(&self.cookie_meta_path(&domain), toml::to_string_pretty(&meta)?.as_bytes())?;

        tracing::info!("Saved cookie for {}", domain);
        Ok(CredentialEntry {
            domain,
            kind: CredentialKind::Cookie,
            status: meta.status,
            updated_at: meta.updated_at,
            path: cookie_path,
        })
    }

    /// Store (or overwrite) the username/password entry for `domain`
    pub fn upsert_password(
        &self,
        domain: &str,
        username: &str,
        password: &str,
    ) -> Result<CredentialEntry, AuthError> {
        let domain = normalize_domain(domain)?;
        if username.trim().is_empty() {
            return Err(AuthError::Unreadable("username"));
        }
        if password.is_empty() {
            return Err(AuthError::Unreadable("password"));
        }

        let _guard = self.lock();
        let record = PasswordRecord {
            domain: domain.clone(),
            username: username.trim().to_string(),
            password: password.to_string(),
            status: CredentialStatus::Success,
            updated_at: Utc::now(),
        };
        let path = self.password_path(&domain);
        write_atomic(&path, toml::to_string_pretty(&record)?.as_bytes())?;

        tracing::info!("Saved login for {} (user {})", domain, record.username);
        Ok(CredentialEntry {
            domain,
            kind: CredentialKind::Password,
            status: record.status,
            updated_at: record.updated_at,
            path,
        })
    }

    /// Snapshot of every entry, ordered by domain then kind
    pub fn list(&self) -> Result<Vec<CredentialEntry>, AuthError> {
        let mut entries = Vec::new();

        for meta_path in toml_files(&self.cookies_dir())? {
            match read_toml::<CookieMeta>(&meta_path) {
                Some(meta) => entries.push(CredentialEntry {
                    path: self.cookie_path(&meta.domain),
                    domain: meta.domain,
                    kind: CredentialKind::Cookie,
                    status: meta.status,
                    updated_at: meta.updated_at,
                }),
                None => continue,
            }
        }

        for record_path in toml_files(&self.passwords_dir())? {
            match read_toml::<PasswordRecord>(&record_path) {
                Some(record) => entries.push(CredentialEntry {
                    domain: record.domain,
                    kind: CredentialKind::Password,
                    status: record.status,
                    updated_at: record.updated_at,
                    path: record_path,
                }),
                None => continue,
            }
        }

        entries.sort_by(|a, b| a.domain.cmp(&b.domain).then(a.kind.cmp(&b.kind)));
        Ok(entries)
    }

    /// Remove the entry for (`domain`, `kind`). Returns false when there was none.
    pub fn delete(&self, domain: &str, kind: CredentialKind) -> Result<bool, AuthError> {
        let domain = normalize_domain(domain)?;
        let _guard = self.lock();

        let removed = match kind {
            CredentialKind::Cookie => {
                let meta = remove_if_exists(&self.cookie_meta_path(&domain))?;
                let blob = remove_if_exists(&self.cookie_path(&domain))?;
                meta || blob
            }
            CredentialKind::Password => remove_if_exists(&self.password_path(&domain))?,
        };

        if removed {
            tracing::info!("Deleted {} credential for {}", kind, domain);
        } else {
            tracing::debug!("No {} credential stored for {}", kind, domain);
        }
        Ok(removed)
    }

    /// Find stored credentials for a job host, walking up to parent domains
    pub fn resolve(&self, host: &str) -> ResolvedCredentials {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let mut resolved = ResolvedCredentials::default();

        for candidate in domain_candidates(&host) {
            if resolved.cookie.is_none() {
                let cookie_path = self.cookie_path(candidate);
                if cookie_path.is_file() {
                    resolved.cookie = Some((candidate.to_string(), cookie_path));
                }
            }
            if resolved.login.is_none() {
                if let Some(record) = read_toml::<PasswordRecord>(&self.password_path(candidate)) {
                    resolved.login = Some((
                        candidate.to_string(),
                        Login {
                            username: record.username,
                            password: record.password,
                        },
                    ));
                }
            }
        }

        resolved
    }

    /// Record the outcome of a job that used the entry
    pub fn record_use(
        &self,
        domain: &str,
        kind: CredentialKind,
        status: CredentialStatus,
    ) -> Result<(), AuthError> {
        let domain = normalize_domain(domain)?;
        let _guard = self.lock();

        match kind {
            CredentialKind::Cookie => {
                let path = self.cookie_meta_path(&domain);
                let Some(mut meta) = read_toml::<CookieMeta>(&path) else {
                    return Ok(());
                };
                meta.status = status;
                meta.updated_at = Utc::now();
                write_atomic(&path, toml::to_string_pretty(&meta)?.as_bytes())?;
            }
            CredentialKind::Password => {
                let path = self.password_path(&domain);
                let Some(mut record) = read_toml::<PasswordRecord>(&path) else {
                    return Ok(());
                };
                record.status = status;
                record.updated_at = Utc::now();
                write_atomic(&path, toml::to_string_pretty(&record)?.as_bytes())?;
            }
        }

        tracing::debug!("Recorded {} status {} for {}", kind, status, domain);
        Ok(())
    }
}

fn storage_error(path: &Path) -> impl FnOnce(std::io::Error) -> AuthError + '_ {
    move |source| AuthError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage_error(parent))?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    std::fs::write(&temp_path, content).map_err(storage_error(&temp_path))?;
    std::fs::rename(&temp_path, path).map_err(storage_error(path))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool, AuthError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(storage_error(path)(e)),
    }
}

fn toml_files(dir: &Path) -> Result<Vec<PathBuf>, AuthError> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_error(dir)(e)),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry.map_err(storage_error(dir))?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            files.push(path);
        }
    }
    Ok(files)
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Skipping unreadable credential file {:?}: {}", path, e);
            None
        }
    }
}
