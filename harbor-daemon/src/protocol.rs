use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use harbor_lifecycle::{AppEvent, Notification};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Commands that act on a single app and carry its `id`.
pub const APP_COMMANDS: [&str; 5] = ["version", "update", "start", "stop", "restart"];

/// JSON newline-delimited request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<AppEvent>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            id: None,
            notification: None,
            event: None,
        }
    }

    pub fn for_app(cmd: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(cmd)
        }
    }

    pub fn notify(notification: Notification) -> Self {
        Self {
            notification: Some(notification),
            ..Self::new("notify")
        }
    }

    pub fn event(event: AppEvent) -> Self {
        Self {
            event: Some(event),
            ..Self::new("event")
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(DaemonError::Protocol(
                self.error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }
}

/// Send one JSON request to the daemon under `home` and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    send_request_to(&socket_path(home), request)
}

/// Send one JSON request to the daemon listening on `socket`.
pub fn send_request_to(
    socket: &Path,
    request: &DaemonRequest,
) -> Result<DaemonResponse, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }

    let mut stream = UnixStream::connect(socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Query daemon status, retrying briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response.into_data(),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_shutdown(home: &Path) -> Result<(), DaemonError> {
    send_request(home, &DaemonRequest::new("shutdown"))?
        .into_data()
        .map(|_| ())
}

pub fn request_list(home: &Path) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::new("list"))?.into_data()
}

/// Run one of [`APP_COMMANDS`] against app `id`.
pub fn request_app(home: &Path, cmd: &str, id: &str) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::for_app(cmd, id))?.into_data()
}

pub fn request_notify(home: &Path, notification: Notification) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::notify(notification))?.into_data()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use harbor_core::AppId;

    use super::*;

    #[test]
    fn app_request_omits_unused_fields() {
        let request = DaemonRequest::for_app("update", "svc-a");
        assert_eq!(
            serde_json::to_value(&request).expect("json"),
            json!({"cmd": "update", "id": "svc-a"})
        );
    }

    #[test]
    fn event_request_round_trips() {
        let request = DaemonRequest::event(AppEvent::Updated {
            id: AppId::from("svc-a"),
            version: "1.3.0".to_string(),
        });
        let line = serde_json::to_string(&request).expect("encode");
        assert!(line.contains(r#""event":{"event":"app:updated""#));
        let back: DaemonRequest = serde_json::from_str(&line).expect("decode");
        assert_eq!(back, request);
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = DaemonResponse::error("no app registered with id 'x'")
            .into_data()
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg.contains("'x'")));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        assert!(matches!(
            request_list(home.path()),
            Err(DaemonError::DaemonNotRunning { .. })
        ));
    }
}
