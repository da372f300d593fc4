//! Docker log driver plugin API, served as HTTP over a Unix socket.
//!
//! ## Endpoints
//!
//! - `POST /Plugin.Activate` - handshake, reports `LoggingDriver`
//! - `POST /LogDriver.StartLogging` - `{File, Info: {ContainerID, Config}}`
//! - `POST /LogDriver.StopLogging` - `{File}`
//! - `POST /LogDriver.Capabilities` - `{Cap: {ReadLogs: false}}`
//!
//! Failures are reported in the `Err` field of a 200 response; only bodies
//! that cannot be parsed get a 400.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio::sync::broadcast;

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, StreamInfo};
use crate::runtime::{handle_request, prepare_socket_for_bind, set_socket_permissions, DaemonState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartLoggingRequest {
    pub file: String,
    #[serde(default)]
    pub info: ContainerInfo,
}

/// The part of Docker's logger info this driver reads. Other fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "ContainerID", default)]
    pub container_id: String,
    #[serde(rename = "Config", default)]
    pub config: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopLoggingRequest {
    pub file: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub err: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub err: String,
    pub cap: Capability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub read_logs: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<&'static str>,
}

pub fn create_plugin_router(state: DaemonState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/LogDriver.StartLogging", post(start_logging))
        .route("/LogDriver.StopLogging", post(stop_logging))
        .route("/LogDriver.Capabilities", post(capabilities))
        .with_state(state)
}

/// Serve the plugin API on `socket` until `shutdown` fires.
pub(crate) async fn serve_plugin_socket(
    state: DaemonState,
    socket: PathBuf,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    prepare_socket_for_bind(&socket)?;
    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "serving log driver plugin API");

    axum::serve(listener, create_plugin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| io_err(&socket, e))?;

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: vec!["LoggingDriver"],
    })
}

async fn start_logging(State(state): State<DaemonState>, body: Bytes) -> Response {
    let request: StartLoggingRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return bad_request("/LogDriver.StartLogging", err),
    };
    if request.info.container_id.is_empty() {
        return respond(Some(
            "ContainerID field is required in requests to /LogDriver.StartLogging".to_string(),
        ));
    }

    let info = StreamInfo {
        container_id: request.info.container_id,
        config: request.info.config.unwrap_or_default(),
    };
    let response = handle_request(
        &state,
        DaemonRequest::StartLogging {
            file: request.file,
            info,
        },
    )
    .await;
    respond(response.error)
}

async fn stop_logging(State(state): State<DaemonState>, body: Bytes) -> Response {
    let request: StopLoggingRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return bad_request("/LogDriver.StopLogging", err),
    };
    let response = handle_request(&state, DaemonRequest::StopLogging { file: request.file }).await;
    respond(response.error)
}

async fn capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        err: String::new(),
        cap: Capability { read_logs: false },
    })
}

fn respond(error: Option<String>) -> Response {
    Json(ErrorResponse {
        err: error.unwrap_or_default(),
    })
    .into_response()
}

fn bad_request(endpoint: &str, err: serde_json::Error) -> Response {
    (
        StatusCode::BAD_REQUEST,
        format!("error unmarshalling request body in {endpoint} handler: {err}"),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{self, Request};
    use splitlog_core::{encode_frame, LogEntry, StreamHandle};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::DaemonConfig;

    fn test_state(base: &Path) -> DaemonState {
        DaemonState::new(DaemonConfig {
            base_dir: base.to_path_buf(),
            socket: base.join("splitlog.sock"),
            ..DaemonConfig::default()
        })
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri(uri)
                    .header("content-type", "application/vnd.docker.plugins.v1+json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn activate_reports_logging_driver() {
        let dir = TempDir::new().unwrap();
        let (status, v) = post_json(
            create_plugin_router(test_state(dir.path())),
            "/Plugin.Activate",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v, serde_json::json!({ "Implements": ["LoggingDriver"] }));
    }

    #[tokio::test]
    async fn capabilities_do_not_include_read_logs() {
        let dir = TempDir::new().unwrap();
        let (_, v) = post_json(
            create_plugin_router(test_state(dir.path())),
            "/LogDriver.Capabilities",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(v["Cap"]["ReadLogs"], false);
        assert_eq!(v["Err"], "");
    }

    #[tokio::test]
    async fn start_and_stop_logging_drive_the_registry() {
        let base = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let capture = inputs.path().join("c9");
        std::fs::write(
            &capture,
            encode_frame(&LogEntry {
                source: "stderr".to_string(),
                time_nano: 0,
                line: Bytes::from_static(b"boot failed"),
                partial: false,
                partial_log_metadata: None,
            }),
        )
        .unwrap();
        let file = capture.to_string_lossy().into_owned();
        let state = test_state(base.path());
        let app = create_plugin_router(state.clone());

        let (status, v) = post_json(
            app.clone(),
            "/LogDriver.StartLogging",
            serde_json::json!({
                "File": file,
                "Info": {
                    "ContainerID": "c9",
                    "ContainerName": "/web",
                    "Config": { "stdout": "c9/out.log", "stderr": "c9/err.log" }
                }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["Err"], "");
        assert!(state.registry.is_active(&StreamHandle::from(file.as_str())));

        let err_log = base.path().join("c9/err.log");
        tokio::time::timeout(Duration::from_secs(5), async {
            while std::fs::read_to_string(&err_log).unwrap_or_default() != "boot failed\n" {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("record routed");

        let (_, v) = post_json(
            app.clone(),
            "/LogDriver.StartLogging",
            serde_json::json!({ "File": file, "Info": { "ContainerID": "c9", "Config": {} } }),
        )
        .await;
        assert!(v["Err"].as_str().unwrap().contains("already configured"));

        let (status, v) = post_json(app, "/LogDriver.StopLogging", serde_json::json!({ "File": file })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["Err"], "");
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn missing_container_id_is_reported_in_err() {
        let dir = TempDir::new().unwrap();
        let state = test_state(dir.path());
        let (status, v) = post_json(
            create_plugin_router(state.clone()),
            "/LogDriver.StartLogging",
            serde_json::json!({ "File": "/run/docker/logging/x", "Info": { "Config": null } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            v["Err"],
            "ContainerID field is required in requests to /LogDriver.StartLogging"
        );
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_is_a_bad_request() {
        let dir = TempDir::new().unwrap();
        let resp = create_plugin_router(test_state(dir.path()))
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/LogDriver.StopLogging")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
