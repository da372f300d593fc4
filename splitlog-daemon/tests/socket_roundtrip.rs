use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use splitlog_core::{encode_frame, LogEntry};
use splitlog_daemon::{
    request_capabilities, request_shutdown, request_start, request_status, request_stop, run,
    DaemonConfig, DaemonError, StreamInfo,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

fn config(root: &Path) -> DaemonConfig {
    DaemonConfig {
        base_dir: root.join("logs"),
        socket: root.join("run").join("splitlog.sock"),
        ..DaemonConfig::default()
    }
}

fn write_capture(path: &Path, lines: &[(&str, &str)]) {
    let mut bytes = Vec::new();
    for (source, line) in lines {
        bytes.extend(encode_frame(&LogEntry {
            source: source.to_string(),
            time_nano: 1_700_000_000_000_000_000,
            line: Bytes::copy_from_slice(line.as_bytes()),
            partial: false,
            partial_log_metadata: None,
        }));
    }
    std::fs::write(path, bytes).expect("write capture");
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.expect("blocking task")
}

async fn wait_for_file(path: PathBuf, expected: &str) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if std::fs::read_to_string(&path).unwrap_or_default() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "{} never contained {expected:?}", path.display());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_socket_drives_a_stream_end_to_end() {
    let root = TempDir::new().expect("root");
    let config = config(root.path());
    let socket = config.socket.clone();
    let base = config.base_dir.clone();
    let daemon = tokio::spawn(run(config));

    // request_status retries while the socket is being bound.
    let status = {
        let socket = socket.clone();
        blocking(move || request_status(&socket)).await.expect("status")
    };
    assert_eq!(status["running"], true);
    assert_eq!(status["streams"].as_array().map(Vec::len), Some(0));

    let caps = {
        let socket = socket.clone();
        blocking(move || request_capabilities(&socket)).await.expect("caps")
    };
    assert!(!caps.read_logs);

    let capture = root.path().join("web.capture");
    write_capture(&capture, &[("stdout", "GET /"), ("stderr", "slow"), ("stdout", "GET /a")]);
    let file = capture.to_string_lossy().into_owned();
    let info = StreamInfo {
        container_id: "web".to_string(),
        config: HashMap::from([
            ("stdout".to_string(), "web/access.log".to_string()),
            ("stderr".to_string(), "web/error.log".to_string()),
        ]),
    };

    {
        let socket = socket.clone();
        let file = file.clone();
        let info = info.clone();
        blocking(move || request_start(&socket, file, info)).await.expect("start");
    }

    wait_for_file(base.join("web/access.log"), "GET /\nGET /a\n").await;
    wait_for_file(base.join("web/error.log"), "slow\n").await;

    let duplicate = {
        let socket = socket.clone();
        let file = file.clone();
        blocking(move || request_start(&socket, file, info)).await
    };
    match duplicate {
        Err(DaemonError::Protocol(message)) => {
            assert!(message.contains("already configured"), "got: {message}")
        }
        other => panic!("expected protocol error, got {other:?}"),
    }

    {
        let socket = socket.clone();
        blocking(move || request_stop(&socket, file)).await.expect("stop");
    }
    let status = {
        let socket = socket.clone();
        blocking(move || request_status(&socket)).await.expect("status")
    };
    assert_eq!(status["streams"].as_array().map(Vec::len), Some(0));

    {
        let socket = socket.clone();
        blocking(move || request_shutdown(&socket)).await.expect("shutdown");
    }
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("run result");
    assert!(!socket.exists(), "socket removed on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_start_leaves_base_dir_untouched() {
    let root = TempDir::new().expect("root");
    let config = config(root.path());
    let socket = config.socket.clone();
    let base = config.base_dir.clone();
    let daemon = tokio::spawn(run(config));

    {
        let socket = socket.clone();
        blocking(move || request_status(&socket)).await.expect("status");
    }

    let result = {
        let socket = socket.clone();
        blocking(move || {
            request_start(
                &socket,
                "/nonexistent/fifo".to_string(),
                StreamInfo {
                    container_id: "half".to_string(),
                    config: HashMap::from([("stdout".to_string(), "half/out.log".to_string())]),
                },
            )
        })
        .await
    };
    assert!(matches!(result, Err(DaemonError::Protocol(_))), "got: {result:?}");
    assert!(!base.join("half").exists());

    {
        let socket = socket.clone();
        blocking(move || request_shutdown(&socket)).await.expect("shutdown");
    }
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("run result");
}

async fn wait_for_socket(path: &Path) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "{} was never bound", path.display());
}

async fn plugin_post(socket: &Path, uri: &str, body: &str) -> String {
    let mut stream = UnixStream::connect(socket).await.expect("connect plugin socket");
    let request = format!(
        "POST {uri} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.expect("send");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plugin_socket_serves_the_log_driver_api() {
    let root = TempDir::new().expect("root");
    let plugin_socket = root.path().join("run").join("plugin.sock");
    let config = DaemonConfig {
        plugin_socket: Some(plugin_socket.clone()),
        ..config(root.path())
    };
    let socket = config.socket.clone();
    let base = config.base_dir.clone();
    let daemon = tokio::spawn(run(config));
    wait_for_socket(&plugin_socket).await;

    let activate = plugin_post(&plugin_socket, "/Plugin.Activate", "").await;
    assert!(activate.starts_with("HTTP/1.1 200"), "got: {activate}");
    assert!(activate.contains(r#"{"Implements":["LoggingDriver"]}"#), "got: {activate}");

    let capture = root.path().join("web.capture");
    write_capture(&capture, &[("stdout", "listening on :80")]);
    let body = serde_json::json!({
        "File": capture.to_string_lossy(),
        "Info": { "ContainerID": "web", "Config": { "stdout": "web/out.log" } }
    })
    .to_string();
    let started = plugin_post(&plugin_socket, "/LogDriver.StartLogging", &body).await;
    assert!(started.contains(r#"{"Err":""}"#), "got: {started}");
    wait_for_file(base.join("web/out.log"), "listening on :80\n").await;

    // Streams started over HTTP are visible on the control socket.
    let status = {
        let socket = socket.clone();
        blocking(move || request_status(&socket)).await.expect("status")
    };
    assert_eq!(status["streams"].as_array().map(Vec::len), Some(1));

    let body = serde_json::json!({ "File": capture.to_string_lossy() }).to_string();
    let stopped = plugin_post(&plugin_socket, "/LogDriver.StopLogging", &body).await;
    assert!(stopped.contains(r#"{"Err":""}"#), "got: {stopped}");

    {
        let socket = socket.clone();
        blocking(move || request_shutdown(&socket)).await.expect("shutdown");
    }
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("run result");
    assert!(!plugin_socket.exists(), "plugin socket removed on shutdown");
}
