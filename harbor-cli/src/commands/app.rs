//! `harbor app`: per-app operations, executed by the running daemon.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use harbor_core::config;
use harbor_daemon::{request_app, DaemonError};
use harbor_lifecycle::{AppRegistry, LocalSupervisor};

use super::{home_dir, print_json};

#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Compare the local and remote manifest versions.
    Version(AppArg),
    /// Download if the remote is newer, then restart.
    Update(AppArg),
    /// Make sure the app is present, then (re)start it.
    Start(AppArg),
    /// Stop the app's process.
    Stop(AppArg),
    /// Update the app if the remote is newer, restart it and announce the restart.
    Restart(AppArg),
    /// Print the tail of the app's process log.
    Logs(LogsArgs),
}

#[derive(Args, Debug)]
pub struct AppArg {
    /// App id as configured in config.yaml.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// App id as configured in config.yaml.
    pub id: String,

    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

pub fn run(command: AppCommand) -> Result<()> {
    let home = home_dir()?;
    let (cmd, id) = match command {
        AppCommand::Version(arg) => ("version", arg.id),
        AppCommand::Update(arg) => ("update", arg.id),
        AppCommand::Start(arg) => ("start", arg.id),
        AppCommand::Stop(arg) => ("stop", arg.id),
        AppCommand::Restart(arg) => ("restart", arg.id),
        AppCommand::Logs(args) => return logs(&home, args),
    };

    match request_app(&home, cmd, &id) {
        Ok(data) => print_json(&data),
        Err(err @ DaemonError::DaemonNotRunning { .. }) => {
            Err(err).context("start it with `harbor daemon start`")
        }
        Err(err) => Err(err).with_context(|| format!("`{cmd}` failed for app '{id}'")),
    }
}

fn logs(home: &Path, args: LogsArgs) -> Result<()> {
    let config = config::load_or_default_at(home)
        .with_context(|| format!("failed to load {}", config::config_path_at(home).display()))?;
    let registry = AppRegistry::from_specs(config.defaults.registry_config(home), config.apps)
        .context("config.yaml contains invalid apps; run `harbor apps check`")?;
    let app = registry.find(&args.id)?;

    let supervisor = LocalSupervisor::new(Some(config::logs_dir(home)));
    let path = supervisor
        .log_path(&app.process_name())
        .context("no log directory configured")?;
    print_tail(&path, args.lines).with_context(|| format!("failed to read log for '{}'", app.id))
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
