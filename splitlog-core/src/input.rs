//! Opening the read side of a stream.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::unix::pipe;

use crate::error::LoggingError;

/// Readable input channel of one stream.
pub type InputChannel = Box<dyn AsyncRead + Send + Unpin>;

/// Open `path` for reading.
///
/// A FIFO becomes a read-only, non-blocking pipe receiver and ends when its
/// producer closes the write side. Any other file is read to its end, which
/// is how captured streams are replayed.
pub async fn open_input(path: &Path) -> Result<InputChannel, LoggingError> {
    let input_err = |source| LoggingError::InputOpen {
        path: path.to_path_buf(),
        source,
    };

    let meta = tokio::fs::metadata(path).await.map_err(input_err)?;
    if meta.file_type().is_fifo() {
        return Ok(Box::new(FifoInput::open(path).map_err(input_err)?));
    }

    let file = tokio::fs::File::open(path).await.map_err(input_err)?;
    Ok(Box::new(file))
}

/// Read side of a FIFO.
///
/// A pipe with no writer reads as end of stream, and the producer may attach
/// after logging starts. Until the first bytes arrive the input holds a write
/// end of its own; once data has been read that placeholder is dropped, so the
/// producer closing its end is seen as end of stream.
pub struct FifoInput {
    receiver: pipe::Receiver,
    placeholder: Option<pipe::Sender>,
}

impl FifoInput {
    pub fn open(path: &Path) -> io::Result<Self> {
        let receiver = pipe::OpenOptions::new().open_receiver(path)?;
        // Succeeds without blocking because the receiver above is a reader.
        let placeholder = pipe::OpenOptions::new().open_sender(path)?;
        Ok(Self {
            receiver,
            placeholder: Some(placeholder),
        })
    }

    /// Whether the producer has delivered any bytes yet.
    pub fn producer_attached(&self) -> bool {
        self.placeholder.is_none()
    }
}

impl AsyncRead for FifoInput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.receiver).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.placeholder = None;
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::process::Command;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn mkfifo(path: &Path) {
        let status = Command::new("mkfifo").arg(path).status().expect("run mkfifo");
        assert!(status.success(), "mkfifo failed");
    }

    #[tokio::test]
    async fn regular_file_is_read_to_end() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, b"abc").expect("write");

        let mut input = open_input(&path).await.expect("open");
        let mut out = Vec::new();
        input.read_to_end(&mut out).await.expect("read");
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn missing_path_is_an_input_open_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nope.fifo");

        let err = open_input(&path).await.err().expect("error");
        assert!(matches!(err, LoggingError::InputOpen { .. }), "got: {err}");
        assert!(err.to_string().contains("nope.fifo"));
    }

    #[tokio::test]
    async fn fifo_waits_for_a_writer_instead_of_ending() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("idle.fifo");
        mkfifo(&path);

        let mut input = open_input(&path).await.expect("open");
        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(100), input.read(&mut byte)).await;
        assert!(read.is_err(), "a FIFO without a producer must not read as EOF");
    }

    #[tokio::test]
    async fn fifo_ends_when_the_writer_closes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("stream.fifo");
        mkfifo(&path);

        let mut input = FifoInput::open(&path).expect("open");
        assert!(!input.producer_attached());

        let mut writer = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .expect("open writer");
        writer.write_all(b"frames").expect("write");
        drop(writer);

        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), input.read_to_end(&mut out))
            .await
            .expect("end of stream after writer closed")
            .expect("read");
        assert_eq!(out, b"frames");
        assert!(input.producer_attached());
    }
}
