//! Host collaborators: the native folder picker and the OS file manager.
//!
//! Both sit behind traits so headless runs and tests can swap them out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};

#[async_trait]
pub trait FolderPicker: Send + Sync {
    /// Ask the user for a folder; `None` when the dialog is dismissed
    async fn pick_folder(&self, title: &str, start: &Path) -> Option<PathBuf>;
}

pub trait FolderOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<()>;
}

/// Native dialog via `rfd`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFolderPicker;

#[async_trait]
impl FolderPicker for NativeFolderPicker {
    async fn pick_folder(&self, title: &str, start: &Path) -> Option<PathBuf> {
        let title = title.to_string();
        let start = start.to_path_buf();

        // The dialog blocks its thread until dismissed
        let picked = tokio::task::spawn_blocking(move || {
            let mut dialog = rfd::FileDialog::new().set_title(title.as_str());
            if start.is_dir() {
                dialog = dialog.set_directory(&start);
            }
            dialog.pick_folder()
        })
        .await;

        match picked {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Folder picker task failed: {}", e);
                None
            }
        }
    }
}

/// Opens folders with the platform file manager
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFolderOpener;

impl SystemFolderOpener {
    fn command() -> &'static str {
        if cfg!(target_os = "windows") {
            "explorer"
        } else if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        }
    }
}

impl FolderOpener for SystemFolderOpener {
    fn open(&self, path: &Path) -> Result<()> {
        let program = Self::command();
        let child = std::process::Command::new(program)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to run {} for {:?}", program, path))?;
        tracing::info!("Opening folder: {}", path.display());
        reap(child);
        Ok(())
    }
}

/// Wait for `child` on a detached thread so it does not linger as a zombie
fn reap(mut child: Child) {
    let spawned = std::thread::Builder::new()
        .name("oxygen-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => tracing::debug!("File manager exited with {}", status),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to wait for file manager: {}", e),
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start reaper thread: {}", e);
    }
}
