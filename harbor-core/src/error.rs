//! Error types for harbor-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from config file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `apps:` already contains an entry with this id.
    #[error("app '{id}' is already present in config")]
    DuplicateApp { id: String },
}
