use anyhow::Result;
use clap::Parser;
use oxygen::{
    app::orchestrator::{Orchestrator, OrchestratorOptions},
    cli::{self, Cli, Commands},
    download::engine::{YtDlpEngine, tool_available},
    ipc::protocol::DEFAULT_LISTEN_ADDR,
    util::paths::ConfigLayout,
};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first to get verbose flag and config override
    let cli = Cli::parse();

    // Resolve (and create) the config directory before logging starts
    let (layout, source) = ConfigLayout::resolve(cli.config.clone())?;

    // Daily rotating JSON log file
    let file_appender = tracing_appender::rolling::daily(layout.logs_dir(), "app.jsonl");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let log_level = if cli.verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                    log_level,
                )),
        )
        .init();

    tracing::info!("Starting oxygen...");
    if cli.verbose {
        tracing::info!("Verbose logging enabled (TRACE level)");
    }
    tracing::trace!("CLI arguments: {:?}", cli);

    tracing::info!("Using config directory {:?} (from {})", layout.root(), source);

    check_tools(&cli.yt_dlp).await;

    let engine = Arc::new(YtDlpEngine::new(cli.yt_dlp.clone()));
    let orchestrator = Orchestrator::start(OrchestratorOptions::new(layout.root(), engine));

    let command = cli.command.unwrap_or(Commands::Serve {
        listen: DEFAULT_LISTEN_ADDR.to_string(),
    });
    let exit_code = cli::handler::handle_command(command, &orchestrator).await;

    orchestrator.shutdown().await;
    drop(_guard);
    std::process::exit(exit_code);
}

/// Warn early about missing external tools; jobs still fail with a tooling error
async fn check_tools(yt_dlp: &Path) {
    if !tool_available(yt_dlp, "--version").await {
        tracing::warn!("yt-dlp not found at {:?}; downloads will fail", yt_dlp);
        eprintln!("Warning: yt-dlp not found at {}", yt_dlp.display());
    }
    if !tool_available(Path::new("ffmpeg"), "-version").await {
        tracing::warn!("ffmpeg not found on PATH; merging and audio extraction will fail");
        eprintln!("Warning: ffmpeg not found on PATH");
    }
}
