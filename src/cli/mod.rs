use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod daemon;
pub mod error;
pub mod handler;
pub mod output;

/// oxygen - single-flight yt-dlp download orchestrator
#[derive(Parser, Debug)]
#[command(name = "oxygen")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override config directory path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (TRACE level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the yt-dlp executable
    #[arg(long = "yt-dlp", global = true, env = "OXYGEN_YTDLP", default_value = "yt-dlp", value_name = "PATH")]
    pub yt_dlp: PathBuf,

    /// Subcommand to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator and serve clients over loopback TCP
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR", default_value = crate::ipc::protocol::DEFAULT_LISTEN_ADDR)]
        listen: String,
    },

    /// Download a single URL in-process and wait for it to finish
    Download {
        /// URL to download
        url: String,

        /// Extract audio only
        #[arg(long)]
        audio: bool,
    },

    /// Manage settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Choose an output folder with the native dialog
    Browse {
        /// Output kind (video or audio)
        kind: String,
    },

    /// Open the download folder (or the log folder) in the file manager
    Open {
        /// Open the completion log folder instead
        #[arg(long)]
        logs: bool,
    },

    /// Show or clear the completion log
    Logs {
        #[command(subcommand)]
        action: LogsAction,
    },

    /// Manage stored site credentials
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

/// Settings actions
#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Show all settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set a single setting (e.g., segments 6)
    Set {
        /// Setting name
        field: String,

        /// New value
        value: String,
    },

    /// Restore every default
    Reset,
}

/// Completion log actions
#[derive(Subcommand, Debug)]
pub enum LogsAction {
    /// List every completion log entry
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all completion log files
    Clear,
}

/// Credential actions
#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Store a Netscape cookie file for a domain
    Cookie {
        /// Domain or URL
        domain: String,

        /// Cookie file to import
        file: PathBuf,
    },

    /// Store a username and password for a domain
    Password {
        /// Domain or URL
        domain: String,

        /// Account name
        username: String,

        /// Password
        #[arg(long, env = "OXYGEN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// List stored credentials
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a stored credential
    Delete {
        /// Domain or URL
        domain: String,

        /// Credential kind (cookie or password)
        kind: String,
    },
}
