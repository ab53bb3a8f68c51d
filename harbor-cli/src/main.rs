//! Harbor: keep locally supervised apps in sync with their source repos.
//!
//! # Usage
//!
//! ```text
//! harbor daemon start|stop|status
//! harbor apps list [--json]
//! harbor apps add <id> <owner/name[/sub/path]> --route <route>... [--branch <b>] [--port <p>]
//! harbor apps check
//! harbor app version|update|start|stop|restart <id>
//! harbor app logs <id> [--lines <n>]
//! harbor notify <payload.json | ->
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{app::AppCommand, apps::AppsCommand, daemon::DaemonCommand, notify::NotifyArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "harbor",
    version,
    about = "Keep locally supervised apps in sync with their source repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or query the Harbor daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Inspect and edit the apps in config.yaml.
    Apps {
        #[command(subcommand)]
        command: AppsCommand,
    },

    /// Drive one app through the running daemon.
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// Forward a push notification payload to the daemon.
    Notify(NotifyArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Apps { command } => commands::apps::run(command),
        Commands::App { command } => commands::app::run(command),
        Commands::Notify(args) => args.run(),
    }
}
