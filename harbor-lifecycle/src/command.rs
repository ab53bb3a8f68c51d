//! Small helpers for running external programs (git, npm, pm2).

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;

/// Lines of captured output kept when a command fails.
const TAIL_LINES: usize = 20;

/// Run `program args…` to completion, capturing stdout and stderr.
pub(crate) async fn run(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> std::io::Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.output().await
}

/// Human-readable failure summary: exit status plus the last lines of stderr
/// (or stdout, when stderr is empty).
pub(crate) fn failure_summary(output: &Output) -> String {
    let stream = if output.stderr.iter().all(u8::is_ascii_whitespace) {
        &output.stdout
    } else {
        &output.stderr
    };
    let text = String::from_utf8_lossy(stream);
    let lines: Vec<&str> = text.lines().collect();
    let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        format!("exited with {}", output.status)
    } else {
        format!("exited with {}: {}", output.status, tail)
    }
}
