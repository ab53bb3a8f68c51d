//! Inbound change notifications → per-app updates.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use harbor_core::AppId;

use crate::error::LifecycleError;
use crate::lifecycle::{Lifecycle, UpdateOptions, UpdateOutcome};
use crate::registry::AppRegistry;

/// A push notification, in the shape source hosts send them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// e.g. `refs/heads/main`.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    pub repository: NotificationRepository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRepository {
    /// `owner/name`.
    pub full_name: String,
    #[serde(default)]
    pub default_branch: String,
}

impl Notification {
    pub fn new(full_name: impl Into<String>, git_ref: Option<&str>) -> Self {
        Self {
            git_ref: git_ref.map(str::to_string),
            repository: NotificationRepository {
                full_name: full_name.into(),
                default_branch: String::new(),
            },
        }
    }

    /// Last non-empty segment of `ref`, falling back to the default branch.
    pub fn branch(&self) -> &str {
        self.git_ref
            .as_deref()
            .and_then(|r| r.rsplit('/').find(|seg| !seg.is_empty()))
            .unwrap_or(self.repository.default_branch.as_str())
    }
}

/// Updates spawned for one notification.
#[derive(Debug)]
pub struct Dispatch {
    pub matched: Vec<AppId>,
    tasks: Vec<JoinHandle<Result<UpdateOutcome, LifecycleError>>>,
}

impl Dispatch {
    /// Wait for every spawned update. Dropping a `Dispatch` instead leaves
    /// the updates running.
    pub async fn settled(self) -> Vec<(AppId, Result<UpdateOutcome, LifecycleError>)> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for (id, task) in self.matched.into_iter().zip(self.tasks) {
            let result = task
                .await
                .unwrap_or_else(|_| Err(LifecycleError::Abandoned { id: id.clone() }));
            results.push((id, result));
        }
        results
    }
}

/// Spawn `update()` for every app tracking the notification's repo and
/// branch. Returns without waiting; zero matches is not an error.
pub fn dispatch(
    lifecycle: &Lifecycle,
    registry: &AppRegistry,
    notification: &Notification,
) -> Dispatch {
    let full_name = notification.repository.full_name.as_str();
    let branch = notification.branch();
    let apps = registry.matching(full_name, branch);

    let matched: Vec<AppId> = apps.iter().map(|app| app.id.clone()).collect();
    if matched.is_empty() {
        tracing::info!("notification for {full_name}@{branch} matched no apps");
    } else {
        let ids: Vec<&str> = matched.iter().map(AppId::as_str).collect();
        tracing::info!(
            "notification for {full_name}@{branch} matched {}",
            ids.join(", ")
        );
    }

    let tasks = apps
        .into_iter()
        .map(|app| {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move {
                let result = lifecycle.update(&app, UpdateOptions::default()).await;
                match &result {
                    Ok(outcome) if outcome.updated => {
                        tracing::info!("[{}] notification update applied", app.id)
                    }
                    Ok(_) => tracing::debug!("[{}] notification update was a no-op", app.id),
                    Err(err) => tracing::error!("[{}] notification update failed: {err}", app.id),
                }
                result
            })
        })
        .collect();

    Dispatch { matched, tasks }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::heads(Some("refs/heads/main"), "main")]
    #[case::nested(Some("refs/heads/feature/login"), "login")]
    #[case::trailing_slash(Some("refs/heads/dev/"), "dev")]
    #[case::bare(Some("release"), "release")]
    #[case::no_ref(None, "trunk")]
    #[case::empty_ref(Some(""), "trunk")]
    fn branch_from_ref(#[case] git_ref: Option<&str>, #[case] expected: &str) {
        let mut n = Notification::new("acme/svc-a", git_ref);
        n.repository.default_branch = "trunk".to_string();
        assert_eq!(n.branch(), expected);
    }

    #[test]
    fn parses_push_payload() {
        let n: Notification = serde_json::from_str(
            r#"{"ref":"refs/heads/main","repository":{"full_name":"acme/svc-a","default_branch":"main"},"pusher":{}}"#,
        )
        .expect("parse");
        assert_eq!(n.repository.full_name, "acme/svc-a");
        assert_eq!(n.branch(), "main");
    }
}
