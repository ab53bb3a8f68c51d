//! Local-vs-remote version resolution.

use std::path::Path;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use harbor_core::Manifest;

use crate::app::App;
use crate::error::{io_err, LifecycleError};
use crate::source::SourceClient;

/// Outcome of comparing an app's local checkout with its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    /// The remote manifest does not exist.
    Missing,
    Present {
        /// `None` when nothing has been materialized yet.
        local: Option<String>,
        remote: String,
    },
}

impl VersionStatus {
    pub fn exists(&self) -> bool {
        matches!(self, VersionStatus::Present { .. })
    }

    /// True iff the remote exists and the local version is absent or differs.
    /// Versions compare as exact strings.
    pub fn needs_update(&self) -> bool {
        match self {
            VersionStatus::Missing => false,
            VersionStatus::Present { local, remote } => local.as_deref() != Some(remote.as_str()),
        }
    }
}

/// `{"exists": false}` or `{"exists": true, "local": .., "remote": ..}`.
impl Serialize for VersionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VersionStatus::Missing => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("exists", &false)?;
                map.end()
            }
            VersionStatus::Present { local, remote } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("exists", &true)?;
                map.serialize_entry("local", local)?;
                map.serialize_entry("remote", remote)?;
                map.end()
            }
        }
    }
}

/// Reads the local manifest and asks the source for the remote one.
#[derive(Clone)]
pub struct VersionResolver {
    source: Arc<dyn SourceClient>,
}

impl VersionResolver {
    pub fn new(source: Arc<dyn SourceClient>) -> Self {
        Self { source }
    }

    pub async fn resolve(&self, app: &App) -> Result<VersionStatus, LifecycleError> {
        let Some(remote) = self
            .source
            .remote_manifest(&app.source, &app.manifest_file)
            .await?
        else {
            return Ok(VersionStatus::Missing);
        };
        let local = read_local_manifest(&app.manifest_path())
            .await?
            .map(|m| m.version);
        Ok(VersionStatus::Present {
            local,
            remote: remote.version,
        })
    }
}

/// `Ok(None)` if the file does not exist. Any other read failure is `Io`;
/// a file that does not parse is `Manifest`.
pub async fn read_local_manifest(path: &Path) -> Result<Option<Manifest>, LifecycleError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    Manifest::from_json(&raw)
        .map(Some)
        .map_err(|e| LifecycleError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
