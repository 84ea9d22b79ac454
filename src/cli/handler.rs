use super::error;
use super::output;
use super::{AuthAction, Commands, LogsAction, SettingsAction};
use crate::app::config::{OutputKind, SetOutcome, SettingsError};
use crate::app::orchestrator::Orchestrator;
use crate::download::completion_log::LogResult;
use crate::download::notifier::Event;
use crate::download::queue::EnqueueError;
use crate::download::task::JobId;
use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::Path;
use tokio::sync::broadcast;

/// Handle a CLI command and return exit code
pub async fn handle_command(command: Commands, orchestrator: &Orchestrator) -> i32 {
    let result = match command {
        Commands::Serve { listen } => super::daemon::run_daemon(orchestrator, &listen)
            .await
            .map(|()| error::SUCCESS),
        Commands::Download { url, audio } => handle_download(&url, audio, orchestrator).await,
        Commands::Settings { action } => handle_settings(action, orchestrator).await,
        Commands::Browse { kind } => handle_browse(&kind, orchestrator).await,
        Commands::Open { logs } => handle_open(logs, orchestrator).await,
        Commands::Logs { action } => handle_logs(action, orchestrator).await,
        Commands::Auth { action } => handle_auth(action, orchestrator),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            error::ERROR
        }
    }
}

/// Run one job in-process and report its outcome
async fn handle_download(url: &str, audio_only: bool, orchestrator: &Orchestrator) -> Result<i32> {
    // Subscribe first so the job's first event is not missed
    let mut events = orchestrator.subscribe();

    let id = match orchestrator.enqueue(url, audio_only).await {
        Ok(id) => id,
        Err(e @ EnqueueError::Busy) => {
            eprintln!("{}", e);
            return Ok(error::BUSY);
        }
        Err(e @ EnqueueError::ShuttingDown) => {
            eprintln!("{}", e);
            return Ok(error::ERROR);
        }
        Err(e) => {
            eprintln!("{}", e);
            return Ok(error::INVALID_INPUT);
        }
    };

    println!("Queued {} (job {})", url.trim(), id);

    let code = tokio::select! {
        result = wait_for_job(id, &mut events) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted, cancelling download...");
            orchestrator.shutdown().await;
            error::ERROR
        }
    };

    Ok(code)
}

/// Print a job's progress until its reset signal
async fn wait_for_job(id: JobId, events: &mut broadcast::Receiver<Event>) -> Result<i32> {
    let mut result = None;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Progress display skipped {} event(s)", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("Orchestrator stopped before job {} finished", id)
            }
        };

        match event {
            Event::Progress { job_id, fraction } if job_id == id => {
                print!("\r[{}] downloading", output::format_percent(fraction));
                io::stdout().flush()?;
            }
            Event::Message {
                job_id: Some(job_id),
                text,
            } if job_id == id => {
                println!("\n{}", text);
            }
            Event::LogAppended { entry } if entry.job_id == Some(id) => {
                result = Some(entry.result);
            }
            Event::DownloadReset { job_id: Some(job_id) } if job_id == id => break,
            _ => {}
        }
    }

    Ok(match result {
        Some(LogResult::Success) => {
            println!("✓ Download completed!");
            error::SUCCESS
        }
        Some(LogResult::Failed) => {
            println!("✗ Download failed!");
            error::ERROR
        }
        None => {
            println!("Download cancelled");
            error::ERROR
        }
    })
}

async fn handle_settings(action: SettingsAction, orchestrator: &Orchestrator) -> Result<i32> {
    match action {
        SettingsAction::Show { json } => {
            let settings = orchestrator.settings().await;
            println!("{}", output::format_settings(&settings, json));
            Ok(error::SUCCESS)
        }
        SettingsAction::Set { field, value } => match orchestrator.set_setting(&field, &value).await {
            Ok(SetOutcome::Accepted) => {
                println!("Set {} = {}", field, value);
                Ok(error::SUCCESS)
            }
            Ok(SetOutcome::Coerced(coercion)) => {
                println!("Warning: {}", coercion);
                Ok(error::INVALID_INPUT)
            }
            Err(SettingsError::UnknownField(name)) => {
                eprintln!("Unknown setting: {}", name);
                Ok(error::NOT_FOUND)
            }
            Err(e) => Err(e.into()),
        },
        SettingsAction::Reset => {
            let settings = orchestrator.reset_settings().await?;
            println!("Settings reset to defaults\n");
            println!("{}", output::format_settings(&settings, false));
            Ok(error::SUCCESS)
        }
    }
}

async fn handle_browse(kind: &str, orchestrator: &Orchestrator) -> Result<i32> {
    let kind: OutputKind = match kind.parse() {
        Ok(kind) => kind,
        Err(message) => {
            eprintln!("{}", message);
            return Ok(error::INVALID_INPUT);
        }
    };

    match orchestrator.browse_output_path(kind).await? {
        Some(path) => println!("Output folder set to {}", path.display()),
        None => println!("No folder selected"),
    }
    Ok(error::SUCCESS)
}

async fn handle_open(logs: bool, orchestrator: &Orchestrator) -> Result<i32> {
    let opened = if logs {
        orchestrator.open_logs_folder().await?
    } else {
        orchestrator.open_download_folder().await?
    };
    println!("Opened {}", opened.display());
    Ok(error::SUCCESS)
}

async fn handle_logs(action: LogsAction, orchestrator: &Orchestrator) -> Result<i32> {
    match action {
        LogsAction::List { json } => {
            let entries = orchestrator.read_logs().await?;
            println!("{}", output::format_log_entries(&entries, json));
        }
        LogsAction::Clear => {
            let removed = orchestrator.clear_logs().await?;
            println!("Removed {} log file(s)", removed);
        }
    }
    Ok(error::SUCCESS)
}

fn handle_auth(action: AuthAction, orchestrator: &Orchestrator) -> Result<i32> {
    match action {
        AuthAction::Cookie { domain, file } => {
            let content = read_cookie_file(&file)?;
            report_saved(orchestrator.save_cookie(&domain, &content), "cookie", &domain)
        }
        AuthAction::Password {
            domain,
            username,
            password,
        } => report_saved(
            orchestrator.save_credentials(&domain, &username, &password),
            "login",
            &domain,
        ),
        AuthAction::List { json } => {
            let entries = orchestrator.list_auth();
            println!("{}", output::format_auth_entries(&entries, json));
            Ok(error::SUCCESS)
        }
        AuthAction::Delete { domain, kind } => {
            if kind.parse::<crate::auth::CredentialKind>().is_err() {
                eprintln!("Unknown credential kind: {}", kind);
                return Ok(error::INVALID_INPUT);
            }
            if orchestrator.delete_auth(&domain, &kind) {
                println!("Deleted {} for {}", kind, domain);
                Ok(error::SUCCESS)
            } else {
                eprintln!("No {} stored for {}", kind, domain);
                Ok(error::NOT_FOUND)
            }
        }
    }
}

fn read_cookie_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read cookie file {:?}", path))
}

fn report_saved(ok: bool, what: &str, domain: &str) -> Result<i32> {
    if ok {
        println!("Saved {} for {}", what, domain);
        Ok(error::SUCCESS)
    } else {
        eprintln!("Could not save {} for {:?} (see log for details)", what, domain);
        Ok(error::INVALID_INPUT)
    }
}
