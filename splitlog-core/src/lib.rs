//! splitlog core library: stream registry, per-stream pipelines, framing.
//!
//! - [`frame`]: length-delimited [`frame::LogEntry`] decoding
//! - [`sink`]: append-only output files
//! - [`input`]: opening FIFOs and captured streams
//! - [`pipeline`]: the per-stream consumption task
//! - [`registry`]: [`StreamRegistry`], the owner of every pipeline

pub mod error;
pub mod frame;
pub mod input;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod types;

pub use error::{DecodeError, LoggingError, SinkWriteError};
pub use frame::{encode_frame, DecodedRecord, FrameDecoder, LogEntry, MAX_FRAME_BYTES};
pub use pipeline::{Pipeline, PipelineExit, PipelineState};
pub use registry::{RegistryOptions, StreamRegistry};
pub use types::{
    Channel, PipelineCounters, SinkLocations, Source, StreamHandle, StreamMetadata, StreamStatus,
};
