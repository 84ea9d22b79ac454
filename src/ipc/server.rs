/// Loopback TCP server exposing the orchestrator to presentation clients.
///
/// Each client connection is handled in a separate tokio task. After a
/// `subscribe` request the connection also receives `event` frames.
use super::protocol::{IpcRequest, IpcResponse, setting_value_text};
use crate::app::orchestrator::Orchestrator;
use crate::download::notifier::Event;
use crate::download::queue::EnqueueError;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Accept clients until `cancel` fires
pub async fn serve(listener: TcpListener, orchestrator: Orchestrator, cancel: CancellationToken) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!("IPC server listening on {}", addr),
        Err(e) => tracing::warn!("IPC server listening (address unknown: {})", e),
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                    // Brief pause before retrying to avoid busy-loop on persistent errors
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    continue;
                }
            },
        };

        tracing::info!("IPC client connected from {}", peer);
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            handle_client(stream, orchestrator, cancel).await;
        });
    }

    tracing::info!("IPC server stopped");
}

/// Handle a single client connection.
///
/// Reads newline-delimited JSON requests and writes one response line per
/// request. Malformed lines get an `error` response; the connection stays open.
async fn handle_client(stream: TcpStream, orchestrator: Orchestrator, cancel: CancellationToken) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut events: Option<broadcast::Receiver<Event>> = None;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            event = next_event(&mut events) => {
                let frame = IpcResponse::Event { event };
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read IPC request: {}", e);
                    break;
                }
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(line) {
            Ok(IpcRequest::Subscribe) => {
                // Subscribe before acknowledging so no event after the ack is missed
                events = Some(orchestrator.subscribe());
                IpcResponse::Ok {
                    message: "subscribed".to_string(),
                }
            }
            Ok(request) => process_request(request, &orchestrator).await,
            Err(e) => {
                tracing::warn!("Invalid IPC message: {}: raw: {}", e, line);
                IpcResponse::Error {
                    message: format!("Invalid message: {}", e),
                }
            }
        };

        if write_frame(&mut writer, &response).await.is_err() {
            break;
        }
    }

    tracing::info!("IPC client disconnected");
}

/// Next event for a subscribed connection; pending forever when unsubscribed
async fn next_event(events: &mut Option<broadcast::Receiver<Event>>) -> Event {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("IPC subscriber lagged, {} event(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                *events = None;
                return std::future::pending().await;
            }
        }
    }
}

async fn write_frame<W>(writer: &mut W, frame: &IpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize IPC response: {}", e);
            return Ok(());
        }
    };
    json.push('\n');

    if let Err(e) = writer.write_all(json.as_bytes()).await {
        tracing::warn!("Failed to write IPC response: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Process a single IPC request and return the appropriate response.
pub async fn process_request(request: IpcRequest, orchestrator: &Orchestrator) -> IpcResponse {
    match request {
        IpcRequest::Enqueue { url, audio_only } => {
            tracing::info!("IPC received URL: {}", url);
            match orchestrator.enqueue(&url, audio_only).await {
                Ok(job_id) => IpcResponse::Enqueued { job_id },
                Err(e @ EnqueueError::Busy) => IpcResponse::Busy {
                    message: e.to_string(),
                },
                Err(e @ EnqueueError::ShuttingDown) => IpcResponse::Error {
                    message: e.to_string(),
                },
                Err(e) => IpcResponse::Invalid {
                    message: e.to_string(),
                },
            }
        }
        IpcRequest::LoadSettings => IpcResponse::Settings {
            settings: orchestrator.load_settings().await,
            coercion: None,
        },
        IpcRequest::SetSetting { field, value } => {
            let value = setting_value_text(&value);
            match orchestrator.set_setting(&field, &value).await {
                Ok(outcome) => IpcResponse::Settings {
                    settings: orchestrator.settings().await,
                    coercion: outcome.coercion().cloned(),
                },
                Err(e @ crate::app::config::SettingsError::UnknownField(_)) => IpcResponse::Invalid {
                    message: e.to_string(),
                },
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            }
        }
        IpcRequest::ResetSettings => match orchestrator.reset_settings().await {
            Ok(settings) => IpcResponse::Settings {
                settings,
                coercion: None,
            },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },
        IpcRequest::BrowseOutput { kind } => match orchestrator.browse_output_path(kind).await {
            Ok(path) => IpcResponse::Path { path },
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },
        IpcRequest::OpenDownloadFolder => folder_response(orchestrator.open_download_folder().await),
        IpcRequest::OpenLogsFolder => folder_response(orchestrator.open_logs_folder().await),
        IpcRequest::LoadLogs => match orchestrator.load_logs().await {
            Ok(entries) => IpcResponse::Logs { entries },
            Err(e) => IpcResponse::Error {
                message: format!("{:#}", e),
            },
        },
        IpcRequest::ClearLogs => match orchestrator.clear_logs().await {
            Ok(removed) => IpcResponse::Ok {
                message: format!("Removed {} log file(s)", removed),
            },
            Err(e) => IpcResponse::Error {
                message: format!("{:#}", e),
            },
        },
        IpcRequest::SaveCookie { domain, content } => IpcResponse::Saved {
            ok: orchestrator.save_cookie(&domain, &content),
        },
        IpcRequest::SaveCredentials {
            domain,
            username,
            password,
        } => IpcResponse::Saved {
            ok: orchestrator.save_credentials(&domain, &username, &password),
        },
        IpcRequest::ListAuth => IpcResponse::AuthEntries {
            entries: orchestrator.list_auth(),
        },
        IpcRequest::DeleteAuth { domain, kind } => IpcResponse::Deleted {
            ok: orchestrator.delete_auth(&domain, &kind),
        },
        IpcRequest::Subscribe => IpcResponse::Error {
            message: "subscribe is only available on a connection".to_string(),
        },
        IpcRequest::Ping => IpcResponse::Pong,
    }
}

fn folder_response(result: anyhow::Result<std::path::PathBuf>) -> IpcResponse {
    match result {
        Ok(path) => IpcResponse::Path { path: Some(path) },
        Err(e) => IpcResponse::Error {
            message: format!("{:#}", e),
        },
    }
}
