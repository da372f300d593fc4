use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use splitlog_core::{LoggingError, StreamHandle, StreamMetadata, StreamRegistry};

use crate::config::{DaemonConfig, LogFormat};
use crate::error::{io_err, DaemonError};
use crate::paths::{chown_sinks, prepare_sinks};
use crate::plugin::serve_plugin_socket;
use crate::protocol::{Capabilities, DaemonRequest, DaemonResponse, StreamInfo};

/// Everything a request handler needs.
#[derive(Clone)]
pub struct DaemonState {
    pub config: Arc<DaemonConfig>,
    pub registry: Arc<StreamRegistry>,
    pub started_at_unix: u64,
}

impl DaemonState {
    pub fn new(config: DaemonConfig) -> Self {
        let registry = StreamRegistry::new(config.registry_options());
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            started_at_unix: unix_seconds_now(),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon until a shutdown request or signal arrives, then stop
/// every stream.
pub async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&config)?;

    let state = DaemonState::new(config);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move { signal_task(shutdown).await })
    };

    let plugin_handle = state.config.plugin_socket.clone().map(|socket| {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let state = state.clone();
        tokio::spawn(async move {
            let result = serve_plugin_socket(state, socket, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    });

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    let plugin_result = match plugin_handle {
        Some(handle) => Some(handle.await),
        None => None,
    };

    let active = state.registry.len();
    state.registry.stop_all().await;
    tracing::info!(streams = active, "daemon stopped");

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    if let Some(result) = plugin_result {
        handle_join("plugin_server", result)?;
    }
    Ok(())
}

async fn signal_task(shutdown: broadcast::Sender<()>) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut shutdown_rx = shutdown.subscribe();
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;

    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM, shutting down daemon");
            let _ = shutdown.send(());
            Ok(())
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down daemon");
                    let _ = shutdown.send(());
                    Ok(())
                }
                Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
            }
        }
    }
}

async fn socket_server_task(
    state: DaemonState,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = state.config.socket.clone();
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for control requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: DaemonState,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let is_shutdown = matches!(request, DaemonRequest::Shutdown);
        let response = handle_request(&state, request).await;
        write_response(&mut writer, &response).await?;
        if is_shutdown {
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

/// Execute one control request against the registry.
pub async fn handle_request(state: &DaemonState, request: DaemonRequest) -> DaemonResponse {
    let cmd = request.name();
    let result = match request {
        DaemonRequest::StartLogging { file, info } => start_logging(state, file, info).await,
        DaemonRequest::StopLogging { file } => stop_logging(state, file).await,
        DaemonRequest::Capabilities => Ok(json!(Capabilities { read_logs: false })),
        DaemonRequest::Status => Ok(build_status_payload(state)),
        DaemonRequest::Shutdown => Ok(json!({ "stopping": true })),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => {
            tracing::warn!(cmd, error = %err, "control request failed");
            DaemonResponse::error(err.to_string())
        }
    }
}

async fn start_logging(
    state: &DaemonState,
    file: String,
    info: StreamInfo,
) -> Result<Value, DaemonError> {
    if info.container_id.is_empty() {
        return Err(DaemonError::Protocol(
            "container_id field is required in start_logging requests".to_string(),
        ));
    }

    let handle = StreamHandle::from(file);
    if state.registry.is_active(&handle) {
        return Err(LoggingError::AlreadyActive { handle }.into());
    }

    let metadata = StreamMetadata::from(info);
    let sinks = {
        let config = Arc::clone(&state.config);
        let metadata = metadata.clone();
        tokio::task::spawn_blocking(move || prepare_sinks(&config, &metadata))
            .await
            .map_err(|err| DaemonError::Protocol(format!("sink preparation join error: {err}")))??
    };

    state
        .registry
        .start(handle.clone(), sinks.clone(), metadata)
        .await?;

    let chowned = {
        let config = Arc::clone(&state.config);
        let sinks = sinks.clone();
        tokio::task::spawn_blocking(move || chown_sinks(&config, &sinks))
            .await
            .map_err(|err| DaemonError::Protocol(format!("sink chown join error: {err}")))?
    };
    if let Err(err) = chowned {
        state.registry.stop(&handle).await?;
        return Err(err);
    }

    Ok(json!({ "file": handle, "primary": sinks.primary, "secondary": sinks.secondary }))
}

async fn stop_logging(state: &DaemonState, file: String) -> Result<Value, DaemonError> {
    let handle = StreamHandle::from(file);
    state.registry.stop(&handle).await?;
    Ok(json!({ "file": handle }))
}

fn build_status_payload(state: &DaemonState) -> Value {
    let streams = state.registry.status();
    let running = streams.iter().filter(|s| s.running).count();
    json!({
        "running": true,
        "started_at_unix": state.started_at_unix,
        "socket": state.config.socket.display().to_string(),
        "base_dir": state.config.base_dir.display().to_string(),
        "active_streams": running,
        "streams": streams,
    })
}

pub(crate) fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if let Some(parent) = socket.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(config: &DaemonConfig) -> Result<(), DaemonError> {
    let base = &config.base_dir;
    if !base.exists() {
        fs::create_dir_all(base).map_err(|e| io_err(base, e))?;
    }
    let meta = fs::metadata(base).map_err(|e| io_err(base, e))?;
    if !meta.is_dir() {
        return Err(DaemonError::InvalidConfig(format!(
            "base_dir {} is not a directory",
            base.display()
        )));
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub(crate) fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
