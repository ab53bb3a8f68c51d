//! Source client: remote manifests and materialization of repo contents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use harbor_core::config::SourceConfig;
use harbor_core::{Manifest, SourceRef};

use crate::command;
use crate::error::{io_err, LifecycleError};

/// Access to an app's published code.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// The manifest at `<sub_path>/<manifest_file>` on the source's branch.
    ///
    /// `Ok(None)` means the repo, branch or path does not exist; every other
    /// failure is [`LifecycleError::SourceUnavailable`].
    async fn remote_manifest(
        &self,
        source: &SourceRef,
        manifest_file: &str,
    ) -> Result<Option<Manifest>, LifecycleError>;

    /// Replace `dest` with the contents of the source's sub-path.
    async fn materialize(&self, source: &SourceRef, dest: &Path) -> Result<(), LifecycleError>;
}

/// GitHub-backed source: raw file fetches for manifests, shallow `git clone`
/// for contents.
#[derive(Debug, Clone)]
pub struct GithubSource {
    config: SourceConfig,
    git: String,
}

impl GithubSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            git: "git".to_string(),
        }
    }

    /// Use a specific git executable instead of `git` on `PATH`.
    pub fn with_git(mut self, git: impl Into<String>) -> Self {
        self.git = git.into();
        self
    }

    /// `{api_base}/{owner}/{name}/{branch}/{sub_path}/{manifest_file}`
    pub fn manifest_url(&self, source: &SourceRef, manifest_file: &str) -> String {
        let repo = &source.repo;
        let mut url = format!(
            "{}/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            repo.owner,
            repo.name,
            source.branch
        );
        if !repo.sub_path.is_empty() {
            url.push('/');
            url.push_str(repo.sub_path.trim_matches('/'));
        }
        url.push('/');
        url.push_str(manifest_file);
        url
    }

    /// `{clone_base}/{owner}/{name}.git`, with the token as basic-auth user
    /// when one is configured.
    pub fn clone_url(&self, source: &SourceRef) -> String {
        let base = self.config.clone_base.trim_end_matches('/');
        let base = match (&self.config.token, base.split_once("://")) {
            (Some(token), Some((scheme, rest))) => {
                format!("{scheme}://x-access-token:{token}@{rest}")
            }
            _ => base.to_string(),
        };
        format!("{base}/{}/{}.git", source.repo.owner, source.repo.name)
    }

    fn unavailable(source: &SourceRef, reason: impl Into<String>) -> LifecycleError {
        LifecycleError::SourceUnavailable {
            source_ref: source.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SourceClient for GithubSource {
    async fn remote_manifest(
        &self,
        source: &SourceRef,
        manifest_file: &str,
    ) -> Result<Option<Manifest>, LifecycleError> {
        let url = self.manifest_url(source, manifest_file);
        let token = self.config.token.clone();
        tracing::debug!("fetching manifest {url}");

        let fetched = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
            let mut request = ureq::get(&url);
            if let Some(token) = token {
                request = request.set("Authorization", &format!("token {token}"));
            }
            match request.call() {
                Ok(response) => response
                    .into_string()
                    .map(Some)
                    .map_err(|e| format!("reading {url}: {e}")),
                Err(ureq::Error::Status(404, _)) => Ok(None),
                Err(err) => Err(format!("fetching {url}: {err}")),
            }
        })
        .await
        .map_err(|e| Self::unavailable(source, format!("manifest fetch task failed: {e}")))?
        .map_err(|reason| Self::unavailable(source, reason))?;

        match fetched {
            None => Ok(None),
            Some(body) => Manifest::from_json(&body)
                .map(Some)
                .map_err(|e| Self::unavailable(source, format!("remote manifest is not valid: {e}"))),
        }
    }

    async fn materialize(&self, source: &SourceRef, dest: &Path) -> Result<(), LifecycleError> {
        let staging = staging_dir(dest);
        remove_dir_if_exists(&staging).await?;

        let args: Vec<String> = vec![
            "clone".into(),
            "--depth".into(),
            "1".into(),
            "--single-branch".into(),
            "--branch".into(),
            source.branch.clone(),
            self.clone_url(source),
            staging.display().to_string(),
        ];
        tracing::info!("cloning {source} into {}", staging.display());
        let output = command::run(&self.git, &args, None, &[])
            .await
            .map_err(|e| Self::unavailable(source, format!("failed to run {}: {e}", self.git)))?;
        if !output.status.success() {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(Self::unavailable(source, command::failure_summary(&output)));
        }

        let result = promote(&staging, &source.repo.sub_path, dest).await;
        let _ = tokio::fs::remove_dir_all(&staging).await;
        match result {
            Ok(true) => Ok(()),
            Ok(false) => Err(Self::unavailable(
                source,
                format!("path '{}' not found in repository", source.repo.sub_path),
            )),
            Err(err) => Err(err),
        }
    }
}

/// `<parent>/.<name>.harbor-tmp`, a sibling of `dest` so the final rename
/// stays on one filesystem.
fn staging_dir(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    dest.with_file_name(format!(".{name}.harbor-tmp"))
}

/// Move `<staging>/<sub_path>` over `dest`. `Ok(false)` if the sub-path is
/// missing from the checkout.
async fn promote(staging: &Path, sub_path: &str, dest: &Path) -> Result<bool, LifecycleError> {
    let src = if sub_path.is_empty() {
        staging.to_path_buf()
    } else {
        staging.join(sub_path)
    };
    if !tokio::fs::try_exists(&src).await.map_err(|e| io_err(&src, e))? {
        return Ok(false);
    }
    let git_dir = src.join(".git");
    if tokio::fs::try_exists(&git_dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&git_dir)
            .await
            .map_err(|e| io_err(&git_dir, e))?;
    }
    remove_dir_if_exists(dest).await?;
    tokio::fs::rename(&src, dest)
        .await
        .map_err(|e| io_err(dest, e))?;
    Ok(true)
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), LifecycleError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}
