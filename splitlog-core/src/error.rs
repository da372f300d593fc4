//! Error types for splitlog-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Channel, StreamHandle};

/// Errors returned synchronously by registry start/stop.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A pipeline for this handle is already registered.
    #[error("logging is already configured for {handle}")]
    AlreadyActive { handle: StreamHandle },

    /// The stream metadata carries no owner id.
    #[error("owner id is required to start logging for {handle}")]
    MissingOwner { handle: StreamHandle },

    /// A sink location was not supplied.
    #[error("'{}' path missing from the configuration of {handle}", .channel.wire_name())]
    MissingConfiguration {
        handle: StreamHandle,
        channel: Channel,
    },

    /// A sink file could not be created or opened for append.
    #[error("error opening {channel} log file at {path}: {source}")]
    SinkOpen {
        channel: Channel,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input channel could not be opened for reading.
    #[error("error opening input stream {path}: {source}")]
    InputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline task panicked or was cancelled before it could stop.
    #[error("pipeline for {handle} failed: {message}")]
    PipelineFailed { handle: StreamHandle, message: String },

    /// The handle was stopped while its start was still opening resources.
    #[error("logging for {handle} was stopped before it finished starting")]
    StartAborted { handle: StreamHandle },
}

/// Per-frame decode failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The length prefix announces more bytes than the decoder accepts.
    #[error("frame of {declared} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { declared: usize, limit: usize },

    /// The frame body is not a valid log entry.
    #[error("malformed log entry: {0}")]
    Malformed(#[from] prost::DecodeError),

    /// Reading from the input channel failed.
    #[error("input read error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Whether the decoder can be rebuilt over the same input and continue.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DecodeError::Io(_))
    }
}

/// A single failed append to a sink.
#[derive(Debug, Error)]
#[error("error writing to {channel} log file {path}: {source}")]
pub struct SinkWriteError {
    pub channel: Channel,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
