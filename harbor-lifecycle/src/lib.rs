//! # harbor-lifecycle
//!
//! App lifecycle orchestration: registry, version resolution, single-flight
//! downloads, stop/start sequencing and notification dispatch.
//!
//! External systems are reached only through the port traits
//! [`SourceClient`], [`Installer`], [`ProcessSupervisor`] and
//! [`EventPublisher`]; this crate also ships thin adapters for each.

pub mod app;
mod command;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod events;
pub mod install;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod supervisor;

pub use app::{App, AppStatus, Phase};
pub use dispatch::{dispatch, Dispatch, Notification, NotificationRepository};
pub use download::{DownloadCoordinator, DownloadOptions, DownloadOutcome};
pub use error::{LifecycleError, RegistryError};
pub use events::{AppEvent, EventPublisher, NoopPublisher};
pub use install::{CommandInstaller, Installer};
pub use lifecycle::{BulkOutcome, Lifecycle, StartOutcome, StopOutcome, UpdateOptions, UpdateOutcome};
pub use registry::AppRegistry;
pub use resolver::{read_local_manifest, VersionResolver, VersionStatus};
pub use source::{GithubSource, SourceClient};
pub use supervisor::{LocalSupervisor, Pm2Supervisor, ProcessSupervisor, StartCommand};
