//! Append-only sink for one output channel.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{LoggingError, SinkWriteError};
use crate::types::Channel;

/// Owns the writable side of one channel. Closing consumes the sink, so it can
/// only happen once.
#[derive(Debug)]
pub struct Sink<W> {
    channel: Channel,
    path: PathBuf,
    writer: W,
}

impl Sink<File> {
    /// Create `path` if needed and open it for appending.
    pub async fn open(channel: Channel, path: &Path) -> Result<Self, LoggingError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| LoggingError::SinkOpen {
                channel,
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(channel, path, file))
    }
}

impl<W: AsyncWrite + Unpin> Sink<W> {
    pub fn new(channel: Channel, path: impl Into<PathBuf>, writer: W) -> Self {
        Self {
            channel,
            path: path.into(),
            writer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `bytes` in full. One attempt, no retry.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), SinkWriteError> {
        let result = match self.writer.write_all(bytes).await {
            Ok(()) => self.writer.flush().await,
            Err(err) => Err(err),
        };
        result.map_err(|source| SinkWriteError {
            channel: self.channel,
            path: self.path.clone(),
            source,
        })
    }

    /// Flush and release the underlying writer.
    pub async fn close(mut self) -> Result<(), SinkWriteError> {
        self.writer
            .shutdown()
            .await
            .map_err(|source| SinkWriteError {
                channel: self.channel,
                path: self.path,
                source,
            })
    }
}
