//! Domain types shared by the registry, the pipeline and the control surface.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of one input channel, normally the path of a FIFO.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamHandle(pub String);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StreamHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl StreamHandle {
    /// The handle interpreted as a filesystem path.
    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Channels and sources
// ---------------------------------------------------------------------------

/// Config key naming the primary sink location.
pub const PRIMARY_CONFIG_KEY: &str = "stdout";
/// Config key naming the secondary sink location.
pub const SECONDARY_CONFIG_KEY: &str = "stderr";

/// One of the two logical output channels of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Primary,
    Secondary,
}

impl Channel {
    /// Wire name of the channel, also used as its config key.
    pub fn wire_name(self) -> &'static str {
        match self {
            Channel::Primary => PRIMARY_CONFIG_KEY,
            Channel::Secondary => SECONDARY_CONFIG_KEY,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Primary => write!(f, "primary"),
            Channel::Secondary => write!(f, "secondary"),
        }
    }
}

/// Source tag carried by a decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Primary,
    Secondary,
    Unknown(String),
}

impl Source {
    /// Sink channel a record with this source is routed to, if any.
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Source::Primary => Some(Channel::Primary),
            Source::Secondary => Some(Channel::Secondary),
            Source::Unknown(_) => None,
        }
    }
}

impl From<&str> for Source {
    fn from(tag: &str) -> Self {
        match tag {
            PRIMARY_CONFIG_KEY => Source::Primary,
            SECONDARY_CONFIG_KEY => Source::Secondary,
            other => Source::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Primary => f.write_str(PRIMARY_CONFIG_KEY),
            Source::Secondary => f.write_str(SECONDARY_CONFIG_KEY),
            Source::Unknown(tag) => f.write_str(tag),
        }
    }
}

// ---------------------------------------------------------------------------
// Start-time inputs
// ---------------------------------------------------------------------------

/// Immutable description of a stream supplied when logging starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// Identifier of the entity producing the stream (e.g. a container id).
    pub owner_id: String,
    /// Free-form options; `stdout` and `stderr` name the sink locations.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl StreamMetadata {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            config: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Raw sink location configured for `channel`.
    pub fn sink_option(&self, channel: Channel) -> Option<&str> {
        self.config.get(channel.wire_name()).map(String::as_str)
    }
}

/// Where the two sinks of a stream live. Either side may be missing, which
/// `StreamRegistry::start` rejects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkLocations {
    pub primary: Option<PathBuf>,
    pub secondary: Option<PathBuf>,
}

impl SinkLocations {
    pub fn new(primary: impl Into<PathBuf>, secondary: impl Into<PathBuf>) -> Self {
        Self {
            primary: Some(primary.into()),
            secondary: Some(secondary.into()),
        }
    }

    pub fn get(&self, channel: Channel) -> Option<&PathBuf> {
        match channel {
            Channel::Primary => self.primary.as_ref(),
            Channel::Secondary => self.secondary.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Counters published by a running pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounters {
    pub primary_records: u64,
    pub secondary_records: u64,
    pub decode_errors: u64,
    pub primary_write_errors: u64,
    pub secondary_write_errors: u64,
    pub unrouted: u64,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub handle: StreamHandle,
    pub owner_id: String,
    pub primary: PathBuf,
    pub secondary: PathBuf,
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub counters: PipelineCounters,
}
