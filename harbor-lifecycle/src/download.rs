//! Single-flight materialize + install, scoped per app.
//!
//! The first caller for an app takes the app's slot and spawns the owning
//! task; later callers clone the slot's receiver and wait on it. The slot is
//! cleared by a drop guard inside the owning task, so it is released exactly
//! once whether the download succeeds, fails or panics.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::app::{lock, App, Phase};
use crate::error::{io_err, LifecycleError};
use crate::install::Installer;
use crate::source::SourceClient;

/// Receiver side of an in-flight download. `None` until the owner settles.
pub(crate) type PendingDownload = watch::Receiver<Option<Result<DownloadOutcome, LifecycleError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Run the installer after materializing.
    pub install: bool,
    /// Materialize even when the local folder already has contents.
    pub force: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            install: true,
            force: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub installed: bool,
}

/// Materializes apps through a [`SourceClient`] and optionally installs them.
#[derive(Clone)]
pub struct DownloadCoordinator {
    source: Arc<dyn SourceClient>,
    installer: Option<Arc<dyn Installer>>,
}

impl DownloadCoordinator {
    /// `installer = None` turns every install request into `installed: false`.
    pub fn new(source: Arc<dyn SourceClient>, installer: Option<Arc<dyn Installer>>) -> Self {
        Self { source, installer }
    }

    /// Download `app`, or join the download already in flight for it.
    ///
    /// A joiner receives the in-flight result even if its own `options`
    /// differ.
    pub async fn download(
        &self,
        app: &Arc<App>,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, LifecycleError> {
        let rx = {
            let mut slot = lock(&app.in_flight);
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("[{}] joining in-flight download", app.id);
                    pending.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    self.spawn_owner(Arc::clone(app), options, tx);
                    rx
                }
            }
        };
        wait(rx, app).await
    }

    fn spawn_owner(
        &self,
        app: Arc<App>,
        options: DownloadOptions,
        tx: watch::Sender<Option<Result<DownloadOutcome, LifecycleError>>>,
    ) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let release = SlotGuard(Arc::clone(&app));
            let result = coordinator.run(&app, options).await;
            if let Err(err) = &result {
                tracing::warn!("[{}] download failed: {err}", app.id);
            }
            drop(release);
            // No receivers left is fine: every caller went away.
            let _ = tx.send(Some(result));
        });
    }

    async fn run(
        &self,
        app: &App,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, LifecycleError> {
        let path = app.local_folder.clone();
        if !options.force && has_contents(&path).await? {
            tracing::info!("[{}] {} already present, skipping download", app.id, path.display());
            return Ok(DownloadOutcome {
                path,
                installed: false,
            });
        }

        app.set_phase(Phase::Downloading);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        tracing::info!("[{}] downloading {} into {}", app.id, app.source, path.display());
        self.source.materialize(&app.source, &path).await?;

        let mut installed = false;
        if options.install {
            if let Some(installer) = &self.installer {
                app.set_phase(Phase::Installing);
                installer.install(&path).await?;
                installed = true;
            }
        }
        Ok(DownloadOutcome { path, installed })
    }
}

/// Clears the app's slot when the owning task ends, including by panic.
struct SlotGuard(Arc<App>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.0.in_flight).take();
    }
}

async fn wait(
    mut rx: PendingDownload,
    app: &App,
) -> Result<DownloadOutcome, LifecycleError> {
    let abandoned = || LifecycleError::Abandoned { id: app.id.clone() };
    let settled = match rx.wait_for(Option::is_some).await {
        Ok(settled) => settled.clone(),
        Err(_) => None,
    };
    settled.unwrap_or_else(|| Err(abandoned()))
}

async fn has_contents(path: &Path) -> Result<bool, LifecycleError> {
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(path, err)),
    };
    Ok(entries
        .next_entry()
        .await
        .map_err(|e| io_err(path, e))?
        .is_some())
}
