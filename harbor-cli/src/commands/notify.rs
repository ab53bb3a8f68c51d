//! `harbor notify`: hand a push notification payload to the daemon.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use harbor_daemon::request_notify;
use harbor_lifecycle::Notification;

use super::{home_dir, print_json};

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// JSON payload file with `ref` and `repository`; `-` reads stdin.
    pub payload: PathBuf,
}

impl NotifyArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let raw = if self.payload.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read payload from stdin")?;
            buf
        } else {
            std::fs::read_to_string(&self.payload)
                .with_context(|| format!("failed to read {}", self.payload.display()))?
        };

        let notification: Notification =
            serde_json::from_str(&raw).context("payload is not a push notification")?;
        let matched = request_notify(&home, notification).context("failed to notify daemon")?;
        print_json(&matched)
    }
}
