//! Length-delimited log entry framing.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of a
//! protobuf-encoded [`LogEntry`]:
//!
//! ```text
//! +----------------+---------------------------------+
//! | len: u32 (BE)  | LogEntry (len bytes)            |
//! +----------------+---------------------------------+
//! ```
//!
//! [`FrameDecoder`] reads one frame per call. It keeps no state between frames
//! besides its scratch buffer, so recovering from a bad frame is a matter of
//! building a new decoder over the same reader.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::DecodeError;
use crate::types::Source;

/// Default ceiling for a single frame body.
pub const MAX_FRAME_BYTES: usize = 1_000_000;

const LENGTH_PREFIX_BYTES: usize = 4;

/// Wire representation of one log line.
#[derive(Clone, PartialEq, Message)]
pub struct LogEntry {
    #[prost(string, tag = "1")]
    pub source: String,
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    #[prost(bytes = "bytes", tag = "3")]
    pub line: Bytes,
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_log_metadata: Option<PartialLogMetadata>,
}

/// Reassembly hints attached to partial lines.
#[derive(Clone, PartialEq, Message)]
pub struct PartialLogMetadata {
    #[prost(bool, tag = "1")]
    pub last: bool,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

/// A log entry ready for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Line bytes with one `\n` appended.
    pub payload: Bytes,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub partial: bool,
    pub partial_metadata: Option<PartialLogMetadata>,
}

impl From<LogEntry> for DecodedRecord {
    fn from(entry: LogEntry) -> Self {
        // Every record is newline-terminated, partial fragments included.
        let mut payload = BytesMut::with_capacity(entry.line.len() + 1);
        payload.extend_from_slice(&entry.line);
        payload.put_u8(b'\n');

        Self {
            payload: payload.freeze(),
            source: Source::from(entry.source.as_str()),
            timestamp: Utc.timestamp_nanos(entry.time_nano),
            partial: entry.partial,
            partial_metadata: entry.partial_log_metadata,
        }
    }
}

/// Encode `entry` as a single length-prefixed frame.
pub fn encode_frame(entry: &LogEntry) -> Vec<u8> {
    let body = entry.encode_to_vec();
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Reads [`DecodedRecord`]s from a byte stream, one frame at a time.
pub struct FrameDecoder<R> {
    reader: R,
    max_frame_bytes: usize,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
            buf: BytesMut::new(),
        }
    }

    /// Give the reader back, discarding any buffered bytes.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` once the input is exhausted. A frame cut short by
    /// end of input is treated the same way.
    pub async fn next_record(&mut self) -> Result<Option<DecodedRecord>, DecodeError> {
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        if !self.fill(&mut prefix).await? {
            return Ok(None);
        }

        let declared = u32::from_be_bytes(prefix) as usize;
        if declared > self.max_frame_bytes {
            return Err(DecodeError::FrameTooLarge {
                declared,
                limit: self.max_frame_bytes,
            });
        }

        self.buf.clear();
        self.buf.resize(declared, 0);
        let mut body = std::mem::take(&mut self.buf);
        let complete = self.fill(&mut body[..]).await;
        self.buf = body;
        if !complete? {
            tracing::debug!(declared, "input ended inside a frame");
            return Ok(None);
        }

        let entry = LogEntry::decode(&self.buf[..])?;
        Ok(Some(DecodedRecord::from(entry)))
    }

    /// Fill `dst` completely. Returns `false` if the input ends first.
    async fn fill(&mut self, dst: &mut [u8]) -> Result<bool, DecodeError> {
        let mut filled = 0;
        while filled < dst.len() {
            let n = self.reader.read(&mut dst[filled..]).await?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }
}
