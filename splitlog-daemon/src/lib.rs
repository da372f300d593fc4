//! Log collection daemon: control socket, Docker log driver plugin API,
//! configuration and sink layout around the `splitlog-core` stream registry.

pub mod config;
mod error;
pub mod paths;
pub mod plugin;
pub mod protocol;
mod runtime;

pub use config::{DaemonConfig, LogFormat};
pub use error::DaemonError;
pub use protocol::{
    request_capabilities, request_shutdown, request_start, request_status, request_stop,
    send_request, Capabilities, DaemonRequest, DaemonResponse, StreamInfo,
};
pub use runtime::{handle_request, run, start_blocking, DaemonState};
