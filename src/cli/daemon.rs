use crate::app::orchestrator::Orchestrator;
use crate::ipc::server;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Serve IPC clients until Ctrl+C, then stop the orchestrator
pub async fn run_daemon(orchestrator: &Orchestrator, listen: &str) -> Result<()> {
    tracing::info!("Starting daemon mode...");

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind IPC listener on {}", listen))?;
    let addr = listener.local_addr()?;
    if !addr.ip().is_loopback() {
        tracing::warn!("IPC listener on non-loopback address {}", addr);
    }
    println!("oxygen listening on {} (Ctrl+C to stop)", addr);

    let cancel = CancellationToken::new();
    let server_handle = tokio::spawn(server::serve(listener, orchestrator.clone(), cancel.clone()));

    // Wait for Ctrl+C
    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        Err(e) => {
            tracing::error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    cancel.cancel();
    if let Err(e) = server_handle.await {
        tracing::error!("IPC server task failed: {}", e);
    }
    orchestrator.shutdown().await;

    tracing::info!("Daemon stopped");

    Ok(())
}
