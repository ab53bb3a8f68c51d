//! Best-effort fan-out of lifecycle events to peer daemons.
//!
//! Each event is sent once to every configured peer socket as an `event`
//! request. Failures are logged and never retried.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use harbor_lifecycle::{AppEvent, EventPublisher};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse};

#[derive(Debug, Clone, Default)]
pub struct PeerPublisher {
    peers: Vec<PathBuf>,
}

impl PeerPublisher {
    pub fn new(peers: Vec<PathBuf>) -> Self {
        Self { peers }
    }
}

impl EventPublisher for PeerPublisher {
    fn publish(&self, event: AppEvent) {
        tracing::info!(event = event.name(), id = %event.id(), peers = self.peers.len(), "publishing");
        if self.peers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = event.name(), "no runtime; event not sent to peers");
            return;
        };
        for peer in &self.peers {
            let peer = peer.clone();
            let event = event.clone();
            runtime.spawn(async move {
                if let Err(err) = send_event(&peer, &event).await {
                    tracing::warn!(
                        peer = %peer.display(),
                        event = event.name(),
                        error = %err,
                        "peer notification failed",
                    );
                }
            });
        }
    }
}

/// Deliver one event to the daemon listening on `socket` and check its reply.
pub async fn send_event(socket: &Path, event: &AppEvent) -> Result<(), DaemonError> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| io_err(socket, e))?;
    let (reader, mut writer) = stream.into_split();

    let mut payload = serde_json::to_vec(&DaemonRequest::event(event.clone()))?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err(socket, e))?;
    writer.flush().await.map_err(|e| io_err(socket, e))?;

    let mut line = String::new();
    let read = BufReader::new(reader)
        .read_line(&mut line)
        .await
        .map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "peer closed connection before responding".to_string(),
        ));
    }
    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    response.into_data().map(|_| ())
}
