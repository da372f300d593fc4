//! Per-stream consumption task: decode frames, route records to sinks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::frame::{DecodedRecord, FrameDecoder};
use crate::sink::Sink;
use crate::types::{Channel, PipelineCounters, StreamHandle};

/// State a pipeline shares with whoever supervises it.
#[derive(Debug, Default)]
pub struct PipelineState {
    running: AtomicBool,
    primary_records: AtomicU64,
    secondary_records: AtomicU64,
    decode_errors: AtomicU64,
    primary_write_errors: AtomicU64,
    secondary_write_errors: AtomicU64,
    unrouted: AtomicU64,
}

impl PipelineState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            primary_records: self.primary_records.load(Ordering::Relaxed),
            secondary_records: self.secondary_records.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            primary_write_errors: self.primary_write_errors.load(Ordering::Relaxed),
            secondary_write_errors: self.secondary_write_errors.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
        }
    }

    fn record_written(&self, channel: Channel) {
        let counter = match channel {
            Channel::Primary => &self.primary_records,
            Channel::Secondary => &self.secondary_records,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write_error(&self, channel: Channel) {
        let counter = match channel {
            Channel::Primary => &self.primary_write_errors,
            Channel::Secondary => &self.secondary_write_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// The input reached end of stream or failed.
    EndOfStream,
    /// A stop was requested.
    Stopped,
}

/// One input channel plus its two sinks.
pub struct Pipeline<R, W> {
    handle: StreamHandle,
    input: R,
    primary: Sink<W>,
    secondary: Sink<W>,
    max_frame_bytes: usize,
    state: Arc<PipelineState>,
}

impl<R, W> Pipeline<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        handle: StreamHandle,
        input: R,
        primary: Sink<W>,
        secondary: Sink<W>,
        max_frame_bytes: usize,
    ) -> Self {
        let state = Arc::new(PipelineState::default());
        state.running.store(true, Ordering::Release);
        Self {
            handle,
            input,
            primary,
            secondary,
            max_frame_bytes,
            state,
        }
    }

    pub fn sink_path(&self, channel: Channel) -> &Path {
        match channel {
            Channel::Primary => self.primary.path(),
            Channel::Secondary => self.secondary.path(),
        }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        Arc::clone(&self.state)
    }

    /// Consume the input until it ends or `stop` fires, then release the
    /// input and both sinks.
    ///
    /// Dropping the sender half of `stop` counts as a stop request.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) -> PipelineExit {
        let Pipeline {
            handle,
            input,
            mut primary,
            mut secondary,
            max_frame_bytes,
            state,
        } = self;

        tracing::info!(handle = %handle, "stream pipeline started");
        let mut decoder = FrameDecoder::new(input, max_frame_bytes);

        let exit = loop {
            let next = tokio::select! {
                biased;
                _ = &mut stop => break PipelineExit::Stopped,
                next = decoder.next_record() => next,
            };

            match next {
                Ok(Some(record)) => {
                    route(&handle, &state, &mut primary, &mut secondary, record).await;
                }
                Ok(None) => break PipelineExit::EndOfStream,
                Err(err) if err.is_transient() => {
                    state.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        handle = %handle,
                        error = %err,
                        "error decoding log entry, resynchronizing",
                    );
                    decoder = FrameDecoder::new(decoder.into_inner(), max_frame_bytes);
                }
                Err(err) => {
                    tracing::warn!(handle = %handle, error = %err, "input stream failed");
                    break PipelineExit::EndOfStream;
                }
            }
        };

        drop(decoder);
        for sink in [primary, secondary] {
            if let Err(err) = sink.close().await {
                tracing::warn!(handle = %handle, error = %err, "error closing log file");
            }
        }
        state.running.store(false, Ordering::Release);
        tracing::info!(handle = %handle, exit = ?exit, "stream pipeline finished");
        exit
    }
}

async fn route<W: AsyncWrite + Unpin>(
    handle: &StreamHandle,
    state: &PipelineState,
    primary: &mut Sink<W>,
    secondary: &mut Sink<W>,
    record: DecodedRecord,
) {
    let Some(channel) = record.source.channel() else {
        state.unrouted.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            handle = %handle,
            source = %record.source,
            line = %String::from_utf8_lossy(&record.payload).trim_end(),
            "unknown source for message",
        );
        return;
    };

    let sink = match channel {
        Channel::Primary => primary,
        Channel::Secondary => secondary,
    };
    match sink.append(&record.payload).await {
        Ok(()) => state.record_written(channel),
        Err(err) => {
            state.record_write_error(channel);
            tracing::error!(handle = %handle, error = %err, "log write failed");
        }
    }
}
