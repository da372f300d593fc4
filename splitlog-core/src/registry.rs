//! Registry of active streams.
//!
//! # Lifecycle
//!
//! ```text
//! start(h) ── reserve slot ──> Starting ── open sinks + input ──> Active ── stop(h) ──> (gone)
//!                                  │                                 │
//!                                  └── open failed / start dropped:  └── EOF: entry stays, running = false
//!                                      slot released
//! ```
//!
//! The map lock is held only while a slot is inserted, looked up or removed.
//! Files are opened and pipelines are awaited with the lock released; the
//! `Starting` reservation is what keeps a second start of the same handle out
//! in the meantime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::LoggingError;
use crate::frame::MAX_FRAME_BYTES;
use crate::input::{open_input, InputChannel};
use crate::pipeline::{Pipeline, PipelineExit, PipelineState};
use crate::sink::Sink;
use crate::types::{Channel, SinkLocations, StreamHandle, StreamMetadata, StreamStatus};

/// Tunables applied to every pipeline the registry starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub max_frame_bytes: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

enum Slot {
    Starting { reservation: u64 },
    Active(ActiveStream),
}

struct ActiveStream {
    metadata: StreamMetadata,
    primary: PathBuf,
    secondary: PathBuf,
    started_at: DateTime<Utc>,
    state: Arc<PipelineState>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<PipelineExit>,
}

impl ActiveStream {
    fn status(&self, handle: &StreamHandle) -> StreamStatus {
        StreamStatus {
            handle: handle.clone(),
            owner_id: self.metadata.owner_id.clone(),
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            started_at: self.started_at,
            running: self.state.is_running(),
            counters: self.state.counters(),
        }
    }

    async fn shutdown(self, handle: &StreamHandle) -> Result<(), LoggingError> {
        // The receiver is gone if the pipeline already hit end of stream.
        let _ = self.stop.send(());
        match self.task.await {
            Ok(exit) => {
                tracing::info!(handle = %handle, exit = ?exit, "stopped logging");
                Ok(())
            }
            Err(err) => {
                tracing::error!(handle = %handle, error = %err, "pipeline task failed");
                Err(LoggingError::PipelineFailed {
                    handle: handle.clone(),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// A `Starting` slot owned by one call to `start`.
///
/// Dropping it frees the slot, which covers both a failed start and a `start`
/// future dropped mid-open. It must not be dropped while the map lock is held.
struct Reservation<'a> {
    registry: &'a StreamRegistry,
    handle: StreamHandle,
    id: u64,
    armed: bool,
}

impl Reservation<'_> {
    /// Keep the slot; it is about to become `Active`.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(&self.handle, self.id);
        }
    }
}

/// Concurrency-safe map from stream handle to its running pipeline.
pub struct StreamRegistry {
    streams: Mutex<HashMap<StreamHandle, Slot>>,
    next_reservation: AtomicU64,
    options: RegistryOptions,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

impl StreamRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            next_reservation: AtomicU64::new(0),
            options,
        }
    }

    /// Open the sinks and input for `handle` and spawn its pipeline.
    ///
    /// Returns once the pipeline task is spawned; it does not wait for the
    /// first record. On error nothing stays registered and every file opened
    /// by this call has been closed.
    pub async fn start(
        &self,
        handle: StreamHandle,
        sinks: SinkLocations,
        metadata: StreamMetadata,
    ) -> Result<(), LoggingError> {
        let reservation = self.reserve(&handle)?;

        let pipeline = match self.open_pipeline(&handle, &sinks, &metadata).await {
            Ok(pipeline) => pipeline,
            Err(err) => {
                tracing::warn!(handle = %handle, error = %err, "failed to start logging");
                return Err(err);
            }
        };

        let primary = pipeline.sink_path(Channel::Primary).to_path_buf();
        let secondary = pipeline.sink_path(Channel::Secondary).to_path_buf();
        let state = pipeline.state();
        let (stop_tx, stop_rx) = oneshot::channel();

        let mut streams = self.lock();
        if !holds_reservation(&streams, &handle, reservation.id) {
            drop(streams);
            drop(pipeline);
            tracing::info!(handle = %handle, "start aborted by a concurrent stop");
            return Err(LoggingError::StartAborted { handle });
        }
        reservation.disarm();

        let task = tokio::spawn(pipeline.run(stop_rx));
        tracing::info!(
            handle = %handle,
            owner = %metadata.owner_id,
            primary = %primary.display(),
            secondary = %secondary.display(),
            "started logging",
        );
        streams.insert(
            handle,
            Slot::Active(ActiveStream {
                metadata,
                primary,
                secondary,
                started_at: Utc::now(),
                state,
                stop: stop_tx,
                task,
            }),
        );
        Ok(())
    }

    /// Stop `handle` and wait for its pipeline to release its files.
    ///
    /// Returns only after the task has exited and both sinks are closed, so a
    /// sink write stuck on slow storage delays the caller by as much. Unknown
    /// handles are a no-op.
    pub async fn stop(&self, handle: &StreamHandle) -> Result<(), LoggingError> {
        let slot = self.lock().remove(handle);
        match slot {
            None => {
                tracing::debug!(handle = %handle, "stop requested for unknown stream");
                Ok(())
            }
            Some(Slot::Starting { .. }) => {
                tracing::info!(handle = %handle, "stop requested while stream was starting");
                Ok(())
            }
            Some(Slot::Active(active)) => active.shutdown(handle).await,
        }
    }

    /// Stop every registered stream.
    pub async fn stop_all(&self) {
        let drained: Vec<(StreamHandle, Slot)> = self.lock().drain().collect();
        for (handle, slot) in drained {
            if let Slot::Active(active) = slot {
                // Failures are already logged by shutdown.
                let _ = active.shutdown(&handle).await;
            }
        }
    }

    /// Snapshot of every started stream, sorted by handle.
    pub fn status(&self) -> Vec<StreamStatus> {
        let streams = self.lock();
        let mut statuses: Vec<StreamStatus> = streams
            .iter()
            .filter_map(|(handle, slot)| match slot {
                Slot::Active(active) => Some(active.status(handle)),
                Slot::Starting { .. } => None,
            })
            .collect();
        statuses.sort_by(|a, b| a.handle.cmp(&b.handle));
        statuses
    }

    /// Whether `handle` currently holds a slot, starting or active.
    pub fn is_active(&self, handle: &StreamHandle) -> bool {
        self.lock().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamHandle, Slot>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve(&self, handle: &StreamHandle) -> Result<Reservation<'_>, LoggingError> {
        let mut streams = self.lock();
        if streams.contains_key(handle) {
            return Err(LoggingError::AlreadyActive {
                handle: handle.clone(),
            });
        }
        let id = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        streams.insert(handle.clone(), Slot::Starting { reservation: id });
        Ok(Reservation {
            registry: self,
            handle: handle.clone(),
            id,
            armed: true,
        })
    }

    fn release(&self, handle: &StreamHandle, reservation: u64) {
        let mut streams = self.lock();
        if holds_reservation(&streams, handle, reservation) {
            streams.remove(handle);
        }
    }

    async fn open_pipeline(
        &self,
        handle: &StreamHandle,
        sinks: &SinkLocations,
        metadata: &StreamMetadata,
    ) -> Result<Pipeline<InputChannel, File>, LoggingError> {
        if metadata.owner_id.trim().is_empty() {
            return Err(LoggingError::MissingOwner {
                handle: handle.clone(),
            });
        }
        let primary_path = required_location(handle, sinks, Channel::Primary)?;
        let secondary_path = required_location(handle, sinks, Channel::Secondary)?;

        // Each early return drops whatever was opened before it.
        let primary = Sink::open(Channel::Primary, primary_path).await?;
        let secondary = Sink::open(Channel::Secondary, secondary_path).await?;
        let input = open_input(&handle.as_path()).await?;

        Ok(Pipeline::new(
            handle.clone(),
            input,
            primary,
            secondary,
            self.options.max_frame_bytes,
        ))
    }
}

fn holds_reservation(
    streams: &HashMap<StreamHandle, Slot>,
    handle: &StreamHandle,
    reservation: u64,
) -> bool {
    matches!(
        streams.get(handle),
        Some(Slot::Starting { reservation: current }) if *current == reservation
    )
}

fn required_location<'a>(
    handle: &StreamHandle,
    sinks: &'a SinkLocations,
    channel: Channel,
) -> Result<&'a Path, LoggingError> {
    sinks
        .get(channel)
        .map(PathBuf::as_path)
        .ok_or_else(|| LoggingError::MissingConfiguration {
            handle: handle.clone(),
            channel,
        })
}
