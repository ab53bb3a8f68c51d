//! The per-app lifecycle: version, update, start, stop, restart.
//!
//! Phases run `Resolving -> Downloading -> Installing -> Stopping -> Starting`
//! and always settle back to `Idle`, passing through `Failed` on error.
//! There is no rollback: a stop that succeeded stays in effect when the
//! following start fails.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use harbor_core::config::{self, SupervisorKind};
use harbor_core::{AppId, HarborConfig};

use crate::app::{App, Phase};
use crate::download::{DownloadCoordinator, DownloadOptions, DownloadOutcome};
use crate::error::LifecycleError;
use crate::events::{AppEvent, EventPublisher};
use crate::install::{CommandInstaller, Installer};
use crate::resolver::{VersionResolver, VersionStatus};
use crate::source::{GithubSource, SourceClient};
use crate::supervisor::{LocalSupervisor, Pm2Supervisor, ProcessSupervisor, StartCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Launch the app after a version change.
    pub start: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { start: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub exists: bool,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// `Some(true)` when the update also launched the app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,
}

impl UpdateOutcome {
    fn missing() -> Self {
        Self {
            exists: false,
            updated: false,
            version: None,
            started: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub id: AppId,
    pub port: u16,
    pub routes: Vec<String>,
    pub version: Option<String>,
    pub started: bool,
    pub exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub id: AppId,
    pub stopped: bool,
}

/// Per-app results of a bulk operation, in input order.
pub type BulkOutcome<T> = Vec<(AppId, Result<T, LifecycleError>)>;

/// Drives apps through their lifecycle using the injected ports.
///
/// Cheap to clone; every clone shares the same adapters.
#[derive(Clone)]
pub struct Lifecycle {
    resolver: VersionResolver,
    downloads: DownloadCoordinator,
    supervisor: Arc<dyn ProcessSupervisor>,
    publisher: Arc<dyn EventPublisher>,
    start_command: Arc<[String]>,
}

impl Lifecycle {
    pub fn new(
        source: Arc<dyn SourceClient>,
        installer: Option<Arc<dyn Installer>>,
        supervisor: Arc<dyn ProcessSupervisor>,
        publisher: Arc<dyn EventPublisher>,
        start_command: Vec<String>,
    ) -> Self {
        Self {
            resolver: VersionResolver::new(Arc::clone(&source)),
            downloads: DownloadCoordinator::new(source, installer),
            supervisor,
            publisher,
            start_command: start_command.into(),
        }
    }

    /// Wire the configured adapters: GitHub source, command installer (when
    /// enabled) and the configured supervisor.
    pub fn from_config(
        config: &HarborConfig,
        home: &Path,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let source: Arc<dyn SourceClient> = Arc::new(GithubSource::new(config.source.clone()));
        let installer: Option<Arc<dyn Installer>> = if config.install.enabled {
            CommandInstaller::from_argv(&config.install.command)
                .map(|i| Arc::new(i) as Arc<dyn Installer>)
        } else {
            None
        };
        let supervisor: Arc<dyn ProcessSupervisor> = match config.supervisor.kind {
            SupervisorKind::Local => Arc::new(LocalSupervisor::new(Some(config::logs_dir(home)))),
            SupervisorKind::Pm2 => Arc::new(Pm2Supervisor::new()),
        };
        Self::new(
            source,
            installer,
            supervisor,
            publisher,
            config.supervisor.start_command.clone(),
        )
    }

    /// Compare local and remote versions. Read-only; the phase is untouched.
    pub async fn version(&self, app: &App) -> Result<VersionStatus, LifecycleError> {
        self.resolver.resolve(app).await
    }

    /// Single-flight download, settling the app's phase afterwards.
    pub async fn download(
        &self,
        app: &Arc<App>,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome, LifecycleError> {
        settle(app, self.downloads.download(app, options).await)
    }

    /// Bring the app to its remote version; a no-op when already there.
    pub async fn update(
        &self,
        app: &Arc<App>,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome, LifecycleError> {
        settle(app, self.sync(app, options.start).await)
    }

    /// Update without launching, then stop and start the process.
    ///
    /// A missing remote is reported as `{started: false, exists: false}`.
    pub async fn start(&self, app: &Arc<App>) -> Result<StartOutcome, LifecycleError> {
        settle(app, self.start_inner(app).await)
    }

    pub async fn stop(&self, app: &Arc<App>) -> Result<StopOutcome, LifecycleError> {
        let result = {
            let _launch = app.launch.lock().await;
            self.stop_locked(app).await
        };
        settle(
            app,
            result.map(|()| StopOutcome {
                id: app.id.clone(),
                stopped: true,
            }),
        )
    }

    /// `start`, then announce the restart if the app is running.
    pub async fn restart(&self, app: &Arc<App>) -> Result<StartOutcome, LifecycleError> {
        let outcome = self.start(app).await?;
        if outcome.started {
            self.publisher.publish(AppEvent::Restarted {
                id: app.id.clone(),
                version: outcome.version.clone(),
            });
        }
        Ok(outcome)
    }

    pub async fn start_all(&self, apps: &[Arc<App>]) -> BulkOutcome<StartOutcome> {
        self.for_each(apps, |lc, app| async move { lc.start(&app).await })
            .await
    }

    pub async fn stop_all(&self, apps: &[Arc<App>]) -> BulkOutcome<StopOutcome> {
        self.for_each(apps, |lc, app| async move { lc.stop(&app).await })
            .await
    }

    pub async fn update_all(
        &self,
        apps: &[Arc<App>],
        options: UpdateOptions,
    ) -> BulkOutcome<UpdateOutcome> {
        self.for_each(apps, move |lc, app| async move { lc.update(&app, options).await })
            .await
    }

    /// Run `op` for every app concurrently; results keep the input order.
    async fn for_each<T, F, Fut>(&self, apps: &[Arc<App>], op: F) -> BulkOutcome<T>
    where
        T: Send + 'static,
        F: Fn(Lifecycle, Arc<App>) -> Fut,
        Fut: Future<Output = Result<T, LifecycleError>> + Send + 'static,
    {
        let handles: Vec<_> = apps
            .iter()
            .map(|app| {
                let id = app.id.clone();
                (id, tokio::spawn(op(self.clone(), Arc::clone(app))))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    tracing::error!("[{id}] task failed: {join_err}");
                    Err(LifecycleError::Abandoned { id: id.clone() })
                }
            };
            results.push((id, result));
        }
        results
    }

    async fn sync(&self, app: &Arc<App>, start: bool) -> Result<UpdateOutcome, LifecycleError> {
        app.set_phase(Phase::Resolving);
        let status = self.resolver.resolve(app).await?;
        let needs_update = status.needs_update();
        let VersionStatus::Present { local, remote } = status else {
            tracing::info!("[{}] no remote manifest for {}", app.id, app.source);
            return Ok(UpdateOutcome::missing());
        };
        if !needs_update {
            tracing::debug!("[{}] already at {remote}", app.id);
            return Ok(UpdateOutcome {
                exists: true,
                updated: false,
                version: Some(remote),
                started: None,
            });
        }

        self.downloads
            .download(app, DownloadOptions::default())
            .await?;
        let started = if start {
            self.launch(app).await?;
            Some(true)
        } else {
            None
        };

        tracing::info!(
            "[{}] updated {} -> {remote}",
            app.id,
            local.as_deref().unwrap_or("nothing")
        );
        self.publisher.publish(AppEvent::Updated {
            id: app.id.clone(),
            version: remote.clone(),
        });
        Ok(UpdateOutcome {
            exists: true,
            updated: true,
            version: Some(remote),
            started,
        })
    }

    async fn start_inner(&self, app: &Arc<App>) -> Result<StartOutcome, LifecycleError> {
        let synced = self.sync(app, false).await?;
        let mut outcome = StartOutcome {
            id: app.id.clone(),
            port: app.port,
            routes: app.routes.clone(),
            version: synced.version,
            started: false,
            exists: synced.exists,
        };
        if !synced.exists {
            tracing::warn!("[{}] remote manifest not found; not starting", app.id);
            return Ok(outcome);
        }
        self.launch(app).await?;
        outcome.started = true;
        Ok(outcome)
    }

    /// Stop then start under the app's launch lock.
    async fn launch(&self, app: &App) -> Result<(), LifecycleError> {
        let _launch = app.launch.lock().await;
        self.stop_locked(app).await?;

        app.set_phase(Phase::Starting);
        let cmd = StartCommand::for_port(&self.start_command, app.port)?;
        let name = app.process_name();
        self.supervisor.start(&name, &cmd, &app.local_folder).await?;
        tracing::info!("[{}] running as {name}", app.id);
        Ok(())
    }

    /// Caller holds `app.launch`.
    async fn stop_locked(&self, app: &App) -> Result<(), LifecycleError> {
        app.set_phase(Phase::Stopping);
        if self.supervisor.is_installed().await {
            self.supervisor.stop(&app.process_name()).await?;
        } else {
            tracing::debug!("[{}] supervisor unavailable; nothing to stop", app.id);
        }
        Ok(())
    }
}

fn settle<T>(app: &App, result: Result<T, LifecycleError>) -> Result<T, LifecycleError> {
    match &result {
        Ok(_) => app.record_success(),
        Err(err) => {
            tracing::warn!("[{}] {err}", app.id);
            app.record_failure(err);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_outcome_omits_unset_fields() {
        assert_eq!(
            serde_json::to_value(UpdateOutcome::missing()).expect("json"),
            json!({"exists": false, "updated": false})
        );
        let updated = UpdateOutcome {
            exists: true,
            updated: true,
            version: Some("1.3.0".to_string()),
            started: Some(true),
        };
        assert_eq!(
            serde_json::to_value(updated).expect("json"),
            json!({"exists": true, "updated": true, "version": "1.3.0", "started": true})
        );
    }

    #[test]
    fn default_update_starts() {
        assert!(UpdateOptions::default().start);
    }
}
