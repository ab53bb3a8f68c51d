//! Dependency-install step run after materialization.

use std::path::Path;

use async_trait::async_trait;

use crate::command;
use crate::error::LifecycleError;

/// Installs an app's dependencies inside its materialized folder.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, dir: &Path) -> Result<(), LifecycleError>;
}

/// Runs a fixed argv (e.g. `npm install --production`) in the app folder.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    /// `None` when `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, dir: &Path) -> Result<(), LifecycleError> {
        tracing::info!("installing dependencies in {} ({})", dir.display(), self.program);
        let output = command::run(&self.program, &self.args, Some(dir), &[])
            .await
            .map_err(|e| LifecycleError::Install {
                path: dir.to_path_buf(),
                reason: format!("failed to run {}: {e}", self.program),
            })?;
        if !output.status.success() {
            return Err(LifecycleError::Install {
                path: dir.to_path_buf(),
                reason: command::failure_summary(&output),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_argv_yields_no_installer() {
        assert!(CommandInstaller::from_argv(&[]).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn install_runs_inside_dir() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let installer =
            CommandInstaller::from_argv(&argv(&["sh", "-c", "touch installed.marker"])).expect("argv");
        installer.install(dir.path()).await.expect("install");
        assert!(dir.path().join("installed.marker").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_install_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let installer =
            CommandInstaller::from_argv(&argv(&["sh", "-c", "echo missing peer dep >&2; exit 1"]))
                .expect("argv");
        let err = installer.install(dir.path()).await.unwrap_err();
        match err {
            LifecycleError::Install { reason, .. } => assert!(reason.contains("missing peer dep")),
            other => panic!("expected install error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_install_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let installer =
            CommandInstaller::from_argv(&argv(&["harbor-definitely-not-a-binary"])).expect("argv");
        assert!(matches!(
            installer.install(dir.path()).await,
            Err(LifecycleError::Install { .. })
        ));
    }
}
