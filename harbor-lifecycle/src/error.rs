//! Error types for harbor-lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use harbor_core::AppId;

/// Registration and lookup failures of the in-memory app registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A registration field was missing or malformed.
    #[error("invalid app registration: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The id is already taken in this registry.
    #[error("app '{id}' is already registered")]
    DuplicateId { id: AppId },

    /// No app with this id is registered.
    #[error("no app registered with id '{id}'")]
    NotFound { id: AppId },
}

/// All errors that can arise from lifecycle operations.
///
/// `Clone` so one settled download can be handed to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// Manifest fetch or materialization failed for a reason other than
    /// "does not exist" (network, auth, git failure, ...).
    #[error("source unavailable for {source_ref}: {reason}")]
    SourceUnavailable { source_ref: String, reason: String },

    /// The dependency-install step failed.
    #[error("install failed in {path}: {reason}")]
    Install { path: PathBuf, reason: String },

    /// The process supervisor refused or failed a start/stop.
    #[error("process supervisor failed for {process}: {reason}")]
    Process { process: String, reason: String },

    /// A local manifest exists but cannot be parsed.
    #[error("invalid manifest at {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The task owning an in-flight download went away without settling.
    #[error("download for '{id}' ended without a result")]
    Abandoned { id: AppId },
}

/// Convenience constructor for [`LifecycleError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LifecycleError {
    LifecycleError::Io {
        path: path.into(),
        source: Arc::new(source),
    }
}
