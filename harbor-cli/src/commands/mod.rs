pub mod app;
pub mod apps;
pub mod daemon;
pub mod notify;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Pretty-print a JSON value on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
