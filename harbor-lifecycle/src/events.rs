//! Outbound lifecycle events.

use serde::{Deserialize, Serialize};

use harbor_core::AppId;

/// Events published after a successful version change or restart.
///
/// Serialized as `{"event": "app:updated", "payload": {"id": .., "version": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum AppEvent {
    #[serde(rename = "app:updated")]
    Updated { id: AppId, version: String },

    #[serde(rename = "app:restarted")]
    Restarted {
        id: AppId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl AppEvent {
    pub fn id(&self) -> &AppId {
        match self {
            AppEvent::Updated { id, .. } | AppEvent::Restarted { id, .. } => id,
        }
    }

    /// The wire name, e.g. `app:updated`.
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::Updated { .. } => "app:updated",
            AppEvent::Restarted { .. } => "app:restarted",
        }
    }
}

/// Fire-and-forget event sink. Implementations must not block; anything slow
/// belongs on a spawned task.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AppEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: AppEvent) {
        tracing::trace!("dropping {} for {}", event.name(), event.id());
    }
}
