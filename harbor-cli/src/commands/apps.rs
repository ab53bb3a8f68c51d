//! `harbor apps`: inspect and edit the `apps:` list in config.yaml.
//!
//! These commands work on the config file directly and never need the
//! daemon; a running daemon picks up added apps through its config watcher.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use harbor_core::{config, AppSpec, HarborConfig};
use harbor_lifecycle::{App, AppRegistry, RegistryError};

use super::{home_dir, print_json};

#[derive(Subcommand, Debug)]
pub enum AppsCommand {
    /// List configured apps with defaults applied.
    List(ListArgs),
    /// Validate and append an app to config.yaml.
    Add(AddArgs),
    /// Validate every configured app without starting anything.
    Check,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Unique app id.
    pub id: String,

    /// Repository identifier: owner/name[/sub/path].
    pub repo: String,

    /// Route served by the app (repeatable).
    #[arg(long = "route", short = 'r', required = true)]
    pub routes: Vec<String>,

    /// Branch to track instead of the configured default.
    #[arg(long)]
    pub branch: Option<String>,

    /// Port to start the app on instead of the configured default.
    #[arg(long)]
    pub port: Option<u16>,

    /// Root folder under which `<id>/` is materialized.
    #[arg(long)]
    pub target_folder: Option<PathBuf>,
}

impl AddArgs {
    fn into_spec(self) -> AppSpec {
        let mut spec = AppSpec::new(self.id, self.repo, self.routes);
        spec.branch = self.branch;
        spec.port = self.port;
        spec.target_folder = self.target_folder;
        spec
    }
}

pub fn run(command: AppsCommand) -> Result<()> {
    let home = home_dir()?;
    match command {
        AppsCommand::List(args) => list(&home, args),
        AppsCommand::Add(args) => add(&home, args),
        AppsCommand::Check => check(&home),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Serialize, Tabled)]
struct AppRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Repository")]
    repo: String,
    #[tabled(rename = "Branch")]
    branch: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Routes", display_with = "display_routes")]
    routes: Vec<String>,
    #[tabled(rename = "Folder")]
    folder: String,
}

fn display_routes(routes: &[String]) -> String {
    routes.join(", ")
}

impl From<&App> for AppRow {
    fn from(app: &App) -> Self {
        Self {
            id: app.id.to_string(),
            repo: app.source.repo.to_string(),
            branch: app.branch().to_string(),
            port: app.port,
            routes: app.routes.clone(),
            folder: app.local_folder.display().to_string(),
        }
    }
}

fn list(home: &Path, args: ListArgs) -> Result<()> {
    let config = load_config(home)?;
    let (registry, rejected) = validate(home, &config);
    let rows: Vec<AppRow> = registry.list().iter().map(|app| AppRow::from(app.as_ref())).collect();

    if args.json {
        return print_json(&rows);
    }

    if rows.is_empty() && rejected.is_empty() {
        println!("No apps configured. Add one with `harbor apps add`.");
        return Ok(());
    }

    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    for (id, err) in &rejected {
        eprintln!("{} {}: {}", "skipped".yellow(), id, err);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

fn add(home: &Path, args: AddArgs) -> Result<()> {
    let spec = args.into_spec();
    let config = load_config(home)?;

    // Register against the already-configured apps so id clashes and
    // malformed input are reported before anything is written.
    let (mut registry, _) = validate(home, &config);
    let app = registry
        .register(spec.clone())
        .with_context(|| format!("cannot add app '{}'", spec.id))?;

    config::add_app_at(home, spec)
        .with_context(|| format!("failed to write {}", config::config_path_at(home).display()))?;

    println!(
        "{} Added '{}' ({}@{}, port {})",
        "✓".green(),
        app.id,
        app.source.repo,
        app.branch(),
        app.port
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(home: &Path) -> Result<()> {
    let config = load_config(home)?;
    let (registry, rejected) = validate(home, &config);

    for app in registry.list() {
        println!("{} {}", "ok".green(), app.id);
    }
    for (id, err) in &rejected {
        println!("{} {}: {}", "invalid".red(), id, err);
    }

    if !rejected.is_empty() {
        bail!("{} of {} apps are invalid", rejected.len(), config.apps.len());
    }
    println!("{} apps valid", registry.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(home: &Path) -> Result<HarborConfig> {
    config::load_or_default_at(home)
        .with_context(|| format!("failed to load {}", config::config_path_at(home).display()))
}

/// Register every configured app, collecting the ones that fail.
fn validate(home: &Path, config: &HarborConfig) -> (AppRegistry, Vec<(String, RegistryError)>) {
    let mut registry = AppRegistry::new(config.defaults.registry_config(home));
    let mut rejected = Vec::new();
    for spec in &config.apps {
        if let Err(err) = registry.register(spec.clone()) {
            let label = if spec.id.is_empty() {
                "<missing id>".to_string()
            } else {
                spec.id.clone()
            };
            rejected.push((label, err));
        }
    }
    (registry, rejected)
}
