use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, control protocol and peer transport.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] harbor_core::ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] harbor_lifecycle::RegistryError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] harbor_lifecycle::LifecycleError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
