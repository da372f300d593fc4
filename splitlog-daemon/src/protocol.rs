use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use splitlog_core::StreamMetadata;

use crate::error::{io_err, DaemonError};

/// JSON newline-delimited request, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Begin collecting the stream at `file`.
    StartLogging { file: String, info: StreamInfo },
    /// Stop collecting the stream at `file`.
    StopLogging { file: String },
    Capabilities,
    Status,
    /// Stop every stream and exit.
    Shutdown,
}

impl DaemonRequest {
    pub fn name(&self) -> &'static str {
        match self {
            DaemonRequest::StartLogging { .. } => "start_logging",
            DaemonRequest::StopLogging { .. } => "stop_logging",
            DaemonRequest::Capabilities => "capabilities",
            DaemonRequest::Status => "status",
            DaemonRequest::Shutdown => "shutdown",
        }
    }
}

/// Description of the producer of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl From<StreamInfo> for StreamMetadata {
    fn from(info: StreamInfo) -> Self {
        StreamMetadata {
            owner_id: info.container_id,
            config: info.config,
        }
    }
}

/// What this daemon can do beyond collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub read_logs: bool,
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
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
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

/// Query status, retrying briefly while the daemon is still binding its socket.
pub fn request_status(socket: &Path) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(socket, &DaemonRequest::Status) {
            Ok(response) => return response_into_data(response),
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

pub fn request_start(socket: &Path, file: String, info: StreamInfo) -> Result<(), DaemonError> {
    let response = send_request(socket, &DaemonRequest::StartLogging { file, info })?;
    response_into_data(response).map(|_| ())
}

pub fn request_stop(socket: &Path, file: String) -> Result<(), DaemonError> {
    let response = send_request(socket, &DaemonRequest::StopLogging { file })?;
    response_into_data(response).map(|_| ())
}

pub fn request_capabilities(socket: &Path) -> Result<Capabilities, DaemonError> {
    let response = send_request(socket, &DaemonRequest::Capabilities)?;
    let data = response_into_data(response)?;
    Ok(serde_json::from_value(data)?)
}

pub fn request_shutdown(socket: &Path) -> Result<(), DaemonError> {
    let response = send_request(socket, &DaemonRequest::Shutdown)?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
