//! Size-based rotation for supervised app logs.
//!
//! Every `*.log` under `<home>/.harbor/logs` is rotated once it reaches
//! 10 MiB, keeping at most 5 numbered copies:
//!   svc-a-3000.log → svc-a-3000.log.1 → … → svc-a-3000.log.5

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use harbor_core::config::logs_dir;

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` once it holds at least `max_bytes`.
///
/// The oldest copy is dropped, `.n` shifts to `.n+1`, the live file becomes
/// `.1` and an empty live file is recreated. Returns whether a rotation
/// happened; a missing file is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    remove_if_exists(&numbered_path(log_path, max_files))?;
    for n in (1..max_files).rev() {
        let from = numbered_path(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // Children opened the old file in append mode and keep writing to `.1`
    // until restarted; new processes pick up the fresh file.
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;
    Ok(true)
}

/// Live `*.log` files under `<home>/.harbor/logs`, sorted.
pub fn app_logs(home: &Path) -> io::Result<Vec<PathBuf>> {
    let dir = logs_dir(home);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut logs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("log") {
            logs.push(path);
        }
    }
    logs.sort();
    Ok(logs)
}

/// Rotate every app log under `home`. Failures are logged per file.
pub fn rotate_logs(home: &Path) {
    let logs = match app_logs(home) {
        Ok(logs) => logs,
        Err(err) => {
            tracing::warn!(error = %err, "listing app logs failed");
            return;
        }
    };
    for log_path in logs {
        match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// `svc-a-3000.log` + 2 → `svc-a-3000.log.2`
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
