//! In-test fakes for the lifecycle ports.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use harbor_core::{Manifest, RegistryConfig, SourceRef};
use harbor_lifecycle::{
    AppEvent, AppRegistry, EventPublisher, Installer, Lifecycle, LifecycleError,
    ProcessSupervisor, SourceClient, StartCommand,
};

/// Source whose remote version is set by the test. `materialize` writes a
/// manifest carrying that version into the destination.
#[derive(Default)]
pub struct ScriptedSource {
    remote: Mutex<Option<String>>,
    pub manifest_calls: AtomicUsize,
    pub materialize_calls: AtomicUsize,
    fail_materialize: AtomicBool,
    gate: Option<Semaphore>,
}

impl ScriptedSource {
    pub fn with_remote(version: &str) -> Self {
        let source = Self::default();
        source.set_remote(Some(version));
        source
    }

    /// `materialize` blocks until [`ScriptedSource::open_gate`] is called.
    pub fn gated(version: &str) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::with_remote(version)
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    pub fn set_remote(&self, version: Option<&str>) {
        *self.remote.lock().unwrap() = version.map(str::to_string);
    }

    pub fn fail_materialize(&self, fail: bool) {
        self.fail_materialize.store(fail, Ordering::SeqCst);
    }

    pub fn materialized(&self) -> usize {
        self.materialize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn remote_manifest(
        &self,
        _source: &SourceRef,
        _manifest_file: &str,
    ) -> Result<Option<Manifest>, LifecycleError> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote.lock().unwrap().clone().map(Manifest::new))
    }

    async fn materialize(&self, source: &SourceRef, dest: &Path) -> Result<(), LifecycleError> {
        self.materialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate").forget();
        }
        if self.fail_materialize.load(Ordering::SeqCst) {
            return Err(LifecycleError::SourceUnavailable {
                source_ref: source.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        let version = self.remote.lock().unwrap().clone().unwrap_or_default();
        std::fs::create_dir_all(dest).expect("create dest");
        std::fs::write(
            dest.join("package.json"),
            format!(r#"{{"name":"fake","version":"{version}"}}"#),
        )
        .expect("write manifest");
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingInstaller {
    pub calls: AtomicUsize,
    fail: AtomicBool,
}

impl CountingInstaller {
    pub fn fail_install(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Installer for CountingInstaller {
    async fn install(&self, dir: &Path) -> Result<(), LifecycleError> {
        assert!(dir.join("package.json").exists(), "install runs after materialize");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LifecycleError::Install {
                path: dir.to_path_buf(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Records `stop <name>` / `start <name>` in call order.
pub struct RecordingSupervisor {
    pub calls: Mutex<Vec<String>>,
    installed: bool,
    fail_start: AtomicBool,
    /// Scheduler yields taken inside every call, to widen interleavings.
    yields: usize,
}

impl Default for RecordingSupervisor {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            installed: true,
            fail_start: AtomicBool::new(false),
            yields: 0,
        }
    }
}

impl RecordingSupervisor {
    pub fn uninstalled() -> Self {
        Self {
            installed: false,
            ..Self::default()
        }
    }

    /// Yields to the scheduler inside each `stop`/`start` before recording.
    pub fn yielding() -> Self {
        Self {
            yields: 8,
            ..Self::default()
        }
    }

    async fn pause(&self) {
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn is_installed(&self) -> bool {
        self.installed
    }

    async fn start(
        &self,
        name: &str,
        cmd: &StartCommand,
        _cwd: &Path,
    ) -> Result<(), LifecycleError> {
        self.pause().await;
        self.calls.lock().unwrap().push(format!("start {name}"));
        assert!(cmd.env.iter().any(|(k, _)| k == "PORT"));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(LifecycleError::Process {
                process: name.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        self.pause().await;
        self.calls.lock().unwrap().push(format!("stop {name}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<AppEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: AppEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A registry rooted in a temp home plus a lifecycle wired to fakes.
pub struct Harness {
    pub home: TempDir,
    pub registry: AppRegistry,
    pub lifecycle: Lifecycle,
    pub source: Arc<ScriptedSource>,
    pub installer: Arc<CountingInstaller>,
    pub supervisor: Arc<RecordingSupervisor>,
    pub publisher: Arc<RecordingPublisher>,
}

impl Harness {
    pub fn new(source: ScriptedSource) -> Self {
        Self::with_supervisor(source, RecordingSupervisor::default())
    }

    pub fn with_supervisor(source: ScriptedSource, supervisor: RecordingSupervisor) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let home = TempDir::new().expect("home");
        let registry = AppRegistry::new(RegistryConfig::with_home(home.path()));
        let source = Arc::new(source);
        let installer = Arc::new(CountingInstaller::default());
        let supervisor = Arc::new(supervisor);
        let publisher = Arc::new(RecordingPublisher::default());
        let lifecycle = Lifecycle::new(
            source.clone(),
            Some(installer.clone()),
            supervisor.clone(),
            publisher.clone(),
            vec!["node".to_string(), "server.js".to_string()],
        );
        Self {
            home,
            registry,
            lifecycle,
            source,
            installer,
            supervisor,
            publisher,
        }
    }

    pub fn installs(&self) -> usize {
        self.installer.calls.load(Ordering::SeqCst)
    }
}

/// Write `<folder>/package.json` with `version`.
pub fn write_local_version(folder: &Path, version: &str) {
    std::fs::create_dir_all(folder).expect("create app folder");
    std::fs::write(
        folder.join("package.json"),
        format!(r#"{{"version":"{version}"}}"#),
    )
    .expect("write local manifest");
}
