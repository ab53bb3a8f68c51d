use std::path::{Path, PathBuf};
use std::time::Duration;

use harbor_core::config::harbor_root;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.harbor/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    harbor_root(home).join(DAEMON_SOCKET)
}
