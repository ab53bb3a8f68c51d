//! Harbor daemon: control socket, config watcher, peer fan-out and app log
//! rotation around a single [`harbor_lifecycle::Lifecycle`].

mod error;
pub mod log_rotation;
pub mod paths;
pub mod peers;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use peers::PeerPublisher;
pub use protocol::{
    request_app, request_list, request_notify, request_shutdown, request_status, send_request,
    send_request_to, DaemonRequest, DaemonResponse, APP_COMMANDS,
};
pub use runtime::{build_registry, start_blocking, Daemon, SharedRegistry};
