//! Process supervisor port and its local and pm2 adapters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::command;
use crate::error::{io_err, LifecycleError};

/// argv and environment for one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl StartCommand {
    /// `base` followed by `--port <port>`, with `PORT=<port>` in the
    /// environment.
    pub fn for_port(base: &[String], port: u16) -> Result<Self, LifecycleError> {
        let (program, rest) = base.split_first().ok_or_else(|| LifecycleError::Process {
            process: format!("port {port}"),
            reason: "start command is empty".to_string(),
        })?;
        let mut args = rest.to_vec();
        args.push("--port".to_string());
        args.push(port.to_string());
        Ok(Self {
            program: program.clone(),
            args,
            env: vec![("PORT".to_string(), port.to_string())],
        })
    }
}

/// Starts and stops named long-running processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Whether the supervisor can be driven at all.
    async fn is_installed(&self) -> bool;

    async fn start(&self, name: &str, cmd: &StartCommand, cwd: &Path)
        -> Result<(), LifecycleError>;

    /// Stop and forget `name`. Stopping an unknown process is not an error.
    async fn stop(&self, name: &str) -> Result<(), LifecycleError>;
}

fn process_err(name: &str, reason: impl Into<String>) -> LifecycleError {
    LifecycleError::Process {
        process: name.to_string(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Local child processes
// ---------------------------------------------------------------------------

/// Runs apps as children of this process, each leading its own process
/// group so that stopping an app also takes down whatever it spawned.
///
/// Every group is killed when the supervisor is dropped.
#[derive(Debug, Default)]
pub struct LocalSupervisor {
    logs_dir: Option<PathBuf>,
    children: Mutex<HashMap<String, Supervised>>,
}

#[derive(Debug)]
struct Supervised {
    child: Child,
    /// Pid of the child, which is also its process group id.
    pgid: Option<u32>,
}

impl LocalSupervisor {
    /// `logs_dir = None` discards child output.
    pub fn new(logs_dir: Option<PathBuf>) -> Self {
        Self {
            logs_dir,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// `<logs_dir>/<name>.log`, with `:` replaced so the name is a valid
    /// file name everywhere.
    pub fn log_path(&self, name: &str) -> Option<PathBuf> {
        self.logs_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", name.replace(':', "-"))))
    }

    /// Names of children that have not exited.
    pub async fn running(&self) -> Vec<String> {
        let mut children = self.children.lock().await;
        let mut names: Vec<String> = children
            .iter_mut()
            .filter_map(|(name, entry)| {
                matches!(entry.child.try_wait(), Ok(None)).then(|| name.clone())
            })
            .collect();
        names.sort();
        names
    }

    fn output_stdio(&self, name: &str) -> Result<(Stdio, Stdio), LifecycleError> {
        let Some(path) = self.log_path(name) else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        let err_file = file.try_clone().map_err(|e| io_err(&path, e))?;
        Ok((Stdio::from(file), Stdio::from(err_file)))
    }
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn is_installed(&self) -> bool {
        true
    }

    async fn start(
        &self,
        name: &str,
        cmd: &StartCommand,
        cwd: &Path,
    ) -> Result<(), LifecycleError> {
        let mut children = self.children.lock().await;
        if let Some(existing) = children.get_mut(name) {
            if matches!(existing.child.try_wait(), Ok(None)) {
                return Err(process_err(name, "already running"));
            }
        }

        let (stdout, stderr) = self.output_stdio(name)?;
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command
            .spawn()
            .map_err(|e| process_err(name, format!("failed to spawn {}: {e}", cmd.program)))?;

        let pgid = child.id();
        tracing::info!("started {name} (pid {pgid:?}) in {}", cwd.display());
        children.insert(name.to_string(), Supervised { child, pgid });
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        let Some(Supervised { mut child, pgid }) = self.children.lock().await.remove(name) else {
            return Ok(());
        };
        // The app's own children outlive the direct child unless the whole
        // group is signalled.
        if let Some(pgid) = pgid {
            kill_group(pgid)
                .map_err(|e| process_err(name, format!("failed to kill process group {pgid}: {e}")))?;
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("{name} had already exited ({status})");
                Ok(())
            }
            _ => {
                child
                    .kill()
                    .await
                    .map_err(|e| process_err(name, format!("failed to kill: {e}")))?;
                tracing::info!("stopped {name}");
                Ok(())
            }
        }
    }
}

impl Drop for LocalSupervisor {
    fn drop(&mut self) {
        for (name, entry) in self.children.get_mut().iter() {
            if let Some(pgid) = entry.pgid {
                if let Err(err) = kill_group(pgid) {
                    tracing::warn!("failed to kill {name} on shutdown: {err}");
                }
            }
        }
    }
}

/// SIGKILL every process in group `pgid`. An empty group is not an error.
#[cfg(unix)]
fn kill_group(pgid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pgid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// pm2
// ---------------------------------------------------------------------------

/// Drives the `pm2` process manager through its CLI.
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    pm2: String,
}

impl Default for Pm2Supervisor {
    fn default() -> Self {
        Self {
            pm2: "pm2".to_string(),
        }
    }
}

impl Pm2Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific pm2 executable instead of `pm2` on `PATH`.
    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            pm2: executable.into(),
        }
    }

    /// `pm2 start <program> --name <name> --cwd <cwd> -- <args...>`
    pub fn start_args(name: &str, cmd: &StartCommand, cwd: &Path) -> Vec<String> {
        let mut args = vec![
            "start".to_string(),
            cmd.program.clone(),
            "--name".to_string(),
            name.to_string(),
            "--cwd".to_string(),
            cwd.display().to_string(),
        ];
        if !cmd.args.is_empty() {
            args.push("--".to_string());
            args.extend(cmd.args.iter().cloned());
        }
        args
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    async fn is_installed(&self) -> bool {
        match command::run(&self.pm2, &["--version".to_string()], None, &[]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn start(
        &self,
        name: &str,
        cmd: &StartCommand,
        cwd: &Path,
    ) -> Result<(), LifecycleError> {
        let args = Self::start_args(name, cmd, cwd);
        let output = command::run(&self.pm2, &args, Some(cwd), &cmd.env)
            .await
            .map_err(|e| process_err(name, format!("failed to run {}: {e}", self.pm2)))?;
        if !output.status.success() {
            return Err(process_err(name, command::failure_summary(&output)));
        }
        tracing::info!("pm2 started {name}");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        let args = vec!["delete".to_string(), name.to_string()];
        let output = command::run(&self.pm2, &args, None, &[])
            .await
            .map_err(|e| process_err(name, format!("failed to run {}: {e}", self.pm2)))?;
        if output.status.success() {
            return Ok(());
        }
        let summary = command::failure_summary(&output);
        if summary.to_ascii_lowercase().contains("not found") {
            tracing::debug!("pm2 has no process {name}; treating as stopped");
            return Ok(());
        }
        Err(process_err(name, summary))
    }
}
