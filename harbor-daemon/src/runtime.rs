use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;

use harbor_core::config::{self, harbor_root, logs_dir};
use harbor_core::{AppSpec, HarborConfig};
use harbor_lifecycle::{
    dispatch, App, AppEvent, AppRegistry, Lifecycle, LifecycleError, UpdateOptions,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, DEBOUNCE_WINDOW};
use crate::peers::PeerPublisher;
use crate::protocol::{DaemonRequest, DaemonResponse, APP_COMMANDS};

pub type SharedRegistry = Arc<RwLock<AppRegistry>>;

/// Everything the daemon's tasks share.
pub struct Daemon {
    home: PathBuf,
    lifecycle: Lifecycle,
    registry: SharedRegistry,
    started_at_unix: u64,
}

impl Daemon {
    pub fn new(home: PathBuf, lifecycle: Lifecycle, registry: AppRegistry) -> Self {
        Self {
            home,
            lifecycle,
            registry: Arc::new(RwLock::new(registry)),
            started_at_unix: unix_seconds_now(),
        }
    }

    /// Load `<home>/.harbor/config.yaml` (defaults if absent) and wire the
    /// configured adapters, with peer fan-out as the event publisher.
    pub fn from_config(home: &Path) -> Result<Self, DaemonError> {
        let config = config::load_or_default_at(home)?;
        let publisher = Arc::new(PeerPublisher::new(config.peers.clone()));
        let lifecycle = Lifecycle::from_config(&config, home, publisher);
        let registry = build_registry(&config, home);
        Ok(Self::new(home.to_path_buf(), lifecycle, registry))
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Run until ctrl-c or a `shutdown` request. Every registered app is
    /// started once on boot.
    pub async fn run(self) -> Result<(), DaemonError> {
        ensure_runtime_dirs(&self.home)?;
        let daemon = Arc::new(self);
        let (shutdown_tx, _) = broadcast::channel::<()>(16);

        let boot_handle = {
            let daemon = daemon.clone();
            tokio::spawn(async move {
                daemon.start_registered().await;
                Ok(())
            })
        };

        let watcher_handle = {
            let shutdown_rx = shutdown_tx.subscribe();
            let daemon = daemon.clone();
            tokio::spawn(async move {
                let result = config_watcher_task(daemon, shutdown_rx).await;
                if let Err(err) = &result {
                    tracing::error!(error = %err, "config watcher stopped");
                }
                result
            })
        };

        let socket_handle = {
            let shutdown = shutdown_tx.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            let daemon = daemon.clone();
            tokio::spawn(async move {
                let result = socket_server_task(daemon, shutdown.clone(), shutdown_rx).await;
                let _ = shutdown.send(());
                result
            })
        };

        let rotation_handle = {
            let shutdown_rx = shutdown_tx.subscribe();
            let home = daemon.home.clone();
            tokio::spawn(async move { log_rotation_task(home, shutdown_rx).await })
        };

        let signal_handle = {
            let shutdown = shutdown_tx.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_rx.recv() => Ok(()),
                    signal = tokio::signal::ctrl_c() => {
                        match signal {
                            Ok(()) => {
                                tracing::info!("received ctrl-c, shutting down daemon");
                                let _ = shutdown.send(());
                                Ok(())
                            }
                            Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                        }
                    }
                }
            })
        };

        let (boot_result, watcher_result, socket_result, rotation_result, signal_result) = tokio::join!(
            boot_handle,
            watcher_handle,
            socket_handle,
            rotation_handle,
            signal_handle
        );

        handle_join("boot", boot_result)?;
        // A broken watcher only disables hot reload.
        let _ = handle_join("config_watcher", watcher_result);
        handle_join("socket_server", socket_result)?;
        handle_join("log_rotation", rotation_result)?;
        handle_join("signal_handler", signal_result)?;
        tracing::info!("daemon stopped");
        Ok(())
    }

    async fn start_registered(&self) {
        let apps = self.registry.read().await.list().to_vec();
        if apps.is_empty() {
            tracing::info!("no apps registered");
            return;
        }
        for (id, result) in self.lifecycle.start_all(&apps).await {
            match result {
                Ok(outcome) => tracing::info!(
                    %id,
                    started = outcome.started,
                    exists = outcome.exists,
                    version = outcome.version.as_deref().unwrap_or("-"),
                    "boot start",
                ),
                Err(err) => tracing::error!(%id, error = %err, "boot start failed"),
            }
        }
    }

    pub(crate) async fn handle_request(
        &self,
        request: DaemonRequest,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> DaemonResponse {
        match request.cmd.as_str() {
            "status" => DaemonResponse::ok(self.status_payload().await),
            "list" => DaemonResponse::ok(self.list_payload().await),
            cmd if APP_COMMANDS.contains(&cmd) => match request.id {
                Some(id) => self.app_command(cmd, &id).await,
                None => DaemonResponse::error(format!("'{cmd}' requires an app id")),
            },
            "notify" => match request.notification {
                Some(notification) => {
                    let registry = self.registry.read().await;
                    let dispatched = dispatch(&self.lifecycle, &registry, &notification);
                    tracing::info!(
                        repo = %notification.repository.full_name,
                        branch = notification.branch(),
                        matched = dispatched.matched.len(),
                        "notification dispatched",
                    );
                    DaemonResponse::ok(json!({ "matched": dispatched.matched }))
                }
                None => DaemonResponse::error("'notify' requires a notification"),
            },
            "event" => match request.event {
                Some(event) => DaemonResponse::ok(self.peer_event(event).await),
                None => DaemonResponse::error("'event' requires an event"),
            },
            "shutdown" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        }
    }

    async fn app_command(&self, cmd: &str, id: &str) -> DaemonResponse {
        let app = match self.registry.read().await.find(id) {
            Ok(app) => app,
            Err(err) => return DaemonResponse::error(err.to_string()),
        };
        let lifecycle = &self.lifecycle;
        match cmd {
            "version" => respond(lifecycle.version(&app).await),
            "update" => respond(lifecycle.update(&app, UpdateOptions::default()).await),
            "start" => respond(lifecycle.start(&app).await),
            "stop" => respond(lifecycle.stop(&app).await),
            "restart" => respond(lifecycle.restart(&app).await),
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        }
    }

    /// An event fanned out by a peer. `app:updated` converges this daemon's
    /// copy of the app; anything else is only logged.
    async fn peer_event(&self, event: AppEvent) -> Value {
        match event {
            AppEvent::Updated { id, version } => {
                let Ok(app) = self.registry.read().await.find(id.as_str()) else {
                    tracing::debug!(%id, "peer update for an app not registered here");
                    return json!({ "accepted": false });
                };
                tracing::info!(%id, %version, "peer reported update; syncing");
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    if let Err(err) = lifecycle.update(&app, UpdateOptions::default()).await {
                        tracing::error!(id = %app.id, error = %err, "peer-triggered update failed");
                    }
                });
                json!({ "accepted": true })
            }
            AppEvent::Restarted { id, version } => {
                tracing::info!(%id, version = version.as_deref().unwrap_or("-"), "peer restarted app");
                json!({ "accepted": true })
            }
        }
    }

    async fn status_payload(&self) -> Value {
        let apps: Vec<Value> = self
            .registry
            .read()
            .await
            .list()
            .iter()
            .map(|app| {
                json!({
                    "id": app.id,
                    "process": app.process_name(),
                    "status": app.status(),
                    "download_in_flight": app.download_in_flight(),
                })
            })
            .collect();
        json!({
            "running": true,
            "started_at_unix": self.started_at_unix,
            "socket": socket_path(&self.home).display().to_string(),
            "apps": apps,
        })
    }

    async fn list_payload(&self) -> Value {
        let apps: Vec<Value> = self
            .registry
            .read()
            .await
            .list()
            .iter()
            .map(|app| app_summary(app))
            .collect();
        Value::Array(apps)
    }

    /// Re-read the config file and register apps that are new since the last
    /// load. Newly registered apps are started.
    async fn reload_config(&self) -> Result<(), DaemonError> {
        let home = self.home.clone();
        let config = tokio::task::spawn_blocking(move || config::load_at(&home))
            .await
            .map_err(|err| DaemonError::Protocol(format!("config reload join error: {err}")))??;

        let added = {
            let mut registry = self.registry.write().await;
            apply_specs(&mut registry, config.apps)
        };
        if added.is_empty() {
            tracing::info!("config reloaded; no new apps");
            return Ok(());
        }
        for (id, result) in self.lifecycle.start_all(&added).await {
            match result {
                Ok(outcome) => tracing::info!(%id, started = outcome.started, "registered from config"),
                Err(err) => tracing::error!(%id, error = %err, "start after registration failed"),
            }
        }
        Ok(())
    }
}

/// `Daemon::from_config(home)` + run on a fresh multi-thread runtime,
/// blocking the current thread until shutdown.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async { Daemon::from_config(home)?.run().await })
}

/// Build the boot registry from config, skipping (and logging) invalid apps.
pub fn build_registry(config: &HarborConfig, home: &Path) -> AppRegistry {
    let mut registry = AppRegistry::new(config.defaults.registry_config(home));
    apply_specs(&mut registry, config.apps.clone());
    registry
}

/// Register every spec whose id is not yet known. Known ids are kept as they
/// are; a changed definition only takes effect after a daemon restart.
fn apply_specs(registry: &mut AppRegistry, specs: Vec<AppSpec>) -> Vec<Arc<App>> {
    let mut added = Vec::new();
    for spec in specs {
        if let Ok(existing) = registry.find(spec.id.trim()) {
            if existing.spec() != &spec {
                tracing::warn!(
                    id = %existing.id,
                    "app definition changed; restart the daemon to apply it",
                );
            }
            continue;
        }
        let id = spec.id.clone();
        match registry.register(spec) {
            Ok(app) => added.push(app),
            Err(err) => tracing::error!(id = %id, error = %err, "skipping invalid app"),
        }
    }
    added
}

fn app_summary(app: &App) -> Value {
    json!({
        "id": app.id,
        "repo": app.source.repo.to_string(),
        "branch": app.branch(),
        "port": app.port,
        "routes": app.routes,
        "folder": app.local_folder.display().to_string(),
    })
}

fn respond<T: Serialize>(result: Result<T, LifecycleError>) -> DaemonResponse {
    match result.map(|value| serde_json::to_value(value)) {
        Ok(Ok(data)) => DaemonResponse::ok(data),
        Ok(Err(err)) => DaemonResponse::error(format!("encoding response: {err}")),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

async fn config_watcher_task(
    daemon: Arc<Daemon>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = harbor_root(&daemon.home);
    // config.yaml is replaced by rename on save, so watch its directory.
    let root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %root.display(), "watching config directory");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                let Some(path) = event.paths.iter().find(|p| is_config_file(p)) else {
                    continue;
                };
                if !should_process_event(&mut debounce, path, Instant::now()) {
                    continue;
                }
                if let Err(err) = daemon.reload_config().await {
                    tracing::error!(error = %err, "config reload failed");
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&daemon.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let daemon = daemon.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, daemon, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let shutting_down = request.cmd == "shutdown";
        let response = daemon.handle_request(request, &shutdown_tx).await;
        write_response(&mut writer, &response).await?;
        if shutting_down {
            break;
        }
    }

    Ok(())
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Failures are logged per file inside rotate_logs.
                let _ = tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await;
            }
        }
    }
    Ok(())
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_config_file(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()) == Some("config.yaml")
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [harbor_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG`-driven fmt subscriber, `info` by default. Also installs the
/// `log` bridge so library records land in the same output.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
