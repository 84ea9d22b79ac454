use crate::app::config::{SettingField, Settings};
use crate::auth::CredentialEntry;
use crate::download::completion_log::{LogEntry, LogResult};

/// Render a fraction in [0, 1] as a whole percentage
pub fn format_percent(fraction: f64) -> String {
    format!("{:3}%", (fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
}

/// Format settings as `field = value` lines (or JSON)
pub fn format_settings(settings: &Settings, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(settings).unwrap_or_else(|_| "{}".to_string());
    }

    let width = SettingField::ALL
        .iter()
        .map(|f| f.as_str().len())
        .max()
        .unwrap_or(0);

    SettingField::ALL
        .iter()
        .map(|field| format!("{:width$} = {}", field.as_str(), settings.value_of(*field), width = width))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a single completion log row
pub fn format_log_entry(entry: &LogEntry) -> String {
    let status_symbol = match entry.result {
        LogResult::Success => "✓",
        LogResult::Failed => "✗",
    };

    let mut line = format!(
        "{} {} {} -> {}",
        status_symbol,
        entry.display_date(),
        entry.url,
        entry.folder.display()
    );
    if let Some(ref name) = entry.filename {
        line.push_str(&format!(" ({})", name));
    }
    if let Some(ref err) = entry.error {
        line.push_str(&format!("\n  Error: {}", err));
    }
    line
}

/// Format completion log entries for display (human or JSON)
pub fn format_log_entries(entries: &[LogEntry], json: bool) -> String {
    if json {
        serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
    } else if entries.is_empty() {
        "No completion history found".to_string()
    } else {
        let mut out = format!("Completion History ({} entries)\n", entries.len());
        for entry in entries {
            out.push('\n');
            out.push_str(&format_log_entry(entry));
        }
        out
    }
}

/// Format stored credentials as a table (or JSON)
pub fn format_auth_entries(entries: &[CredentialEntry], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string());
    }
    if entries.is_empty() {
        return "No stored credentials.".to_string();
    }

    let width = entries.iter().map(|e| e.domain.len()).max().unwrap_or(0).max(6);
    let mut out = format!("{:width$}  {:8}  {:7}  UPDATED", "DOMAIN", "KIND", "STATUS", width = width);
    for entry in entries {
        out.push_str(&format!(
            "\n{:width$}  {:8}  {:7}  {}",
            entry.domain,
            entry.kind.as_str(),
            entry.status.to_string(),
            entry.updated_at.format("%Y-%m-%d %H:%M:%S"),
            width = width
        ));
    }
    out
}
