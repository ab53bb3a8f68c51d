//! A registered app and its transient orchestration state.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use harbor_core::{AppId, AppSpec, SourceRef};

use crate::download::PendingDownload;
use crate::error::LifecycleError;

/// Where an app currently is in its lifecycle. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Resolving,
    Downloading,
    Installing,
    Stopping,
    Starting,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Resolving => "resolving",
            Phase::Downloading => "downloading",
            Phase::Installing => "installing",
            Phase::Stopping => "stopping",
            Phase::Starting => "starting",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of an app's orchestration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStatus {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// A validated, registered app. Created by
/// [`AppRegistry::register`](crate::registry::AppRegistry::register) and
/// shared as `Arc<App>` for the registry's lifetime.
#[derive(Debug)]
pub struct App {
    pub id: AppId,
    pub source: SourceRef,
    /// `<target_folder>/<id>`.
    pub local_folder: PathBuf,
    pub port: u16,
    pub routes: Vec<String>,
    /// Manifest file name, relative to the repo sub-path and `local_folder`.
    pub manifest_file: String,
    spec: AppSpec,
    /// The single-flight slot: at most one pending download per app.
    pub(crate) in_flight: Mutex<Option<PendingDownload>>,
    /// Held across stop+start so launches of one process name never overlap.
    pub(crate) launch: tokio::sync::Mutex<()>,
    status: Mutex<AppStatus>,
}

impl App {
    pub(crate) fn new(
        id: AppId,
        source: SourceRef,
        local_folder: PathBuf,
        port: u16,
        routes: Vec<String>,
        manifest_file: String,
        spec: AppSpec,
    ) -> Self {
        Self {
            id,
            source,
            local_folder,
            port,
            routes,
            manifest_file,
            spec,
            in_flight: Mutex::new(None),
            launch: tokio::sync::Mutex::new(()),
            status: Mutex::new(AppStatus {
                phase: Phase::Idle,
                last_error: None,
                changed_at: Utc::now(),
            }),
        }
    }

    /// Supervisor process name: `<id>:<port>`.
    pub fn process_name(&self) -> String {
        format!("{}:{}", self.id, self.port)
    }

    pub fn branch(&self) -> &str {
        &self.source.branch
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.local_folder.join(&self.manifest_file)
    }

    /// The registration input this app was built from.
    pub fn spec(&self) -> &AppSpec {
        &self.spec
    }

    pub fn status(&self) -> AppStatus {
        lock(&self.status).clone()
    }

    pub fn download_in_flight(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        let mut status = lock(&self.status);
        if status.phase != phase {
            tracing::debug!("[{}] {} -> {}", self.id, status.phase, phase);
            status.phase = phase;
            status.changed_at = Utc::now();
        }
    }

    /// Pass through `Failed`, keep the error for status, settle back to `Idle`.
    pub(crate) fn record_failure(&self, err: &LifecycleError) {
        self.set_phase(Phase::Failed);
        let mut status = lock(&self.status);
        status.last_error = Some(err.to_string());
        status.phase = Phase::Idle;
        status.changed_at = Utc::now();
    }

    pub(crate) fn record_success(&self) {
        let mut status = lock(&self.status);
        status.last_error = None;
        status.phase = Phase::Idle;
        status.changed_at = Utc::now();
    }
}

/// Lock a std mutex, recovering the guard if a previous holder panicked.
/// None of the guarded state can be left half-written by a panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
