//! Single-producer fork that replicates one frame stream to every
//! registered pipe.
//!
//! The fork is the only reader of its source and the only writer to its
//! pipes. In synchronized mode each `step` is a barrier: the next frame is
//! not read until every live pipe accepted the current one, so no consumer
//! can run ahead and capacity bounds the lag of the slowest one.

use std::{sync::Arc, time::Instant};

use thiserror::Error;
use tracing::{debug, debug_span, warn};
use video_ingest::{FrameSource, SourceError};

use crate::{
    pipe::{PipeMonitor, PipeReceiver, PipeSender, pipe},
    region::RegionSpec,
};

#[derive(Debug, Error)]
pub enum ForkError {
    /// Registration is only allowed before the first `step`.
    #[error("cannot register a pipe once distribution has started")]
    Started,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// One frame stream, fanned out to N pipes in lockstep.
pub struct FrameFork {
    source: Box<dyn FrameSource>,
    senders: Vec<PipeSender>,
    capacity: usize,
    synchronized: bool,
    started: bool,
    next_sequence: u64,
    dropped: u64,
}

impl FrameFork {
    /// `capacity` is the per-pipe frame buffer (clamped to at least 1);
    /// `synchronized` selects barrier delivery over best-effort fan-out.
    pub fn new(source: Box<dyn FrameSource>, capacity: usize, synchronized: bool) -> Self {
        Self {
            source,
            senders: Vec::new(),
            capacity: capacity.max(1),
            synchronized,
            started: false,
            next_sequence: 0,
            dropped: 0,
        }
    }

    /// Create a pipe bound to this fork. Delivery follows registration
    /// order. Fails once `step` has been called: consumers cannot join a
    /// running barrier.
    pub fn register(
        &mut self,
        region: RegionSpec,
    ) -> Result<(PipeReceiver, PipeMonitor), ForkError> {
        if self.started {
            return Err(ForkError::Started);
        }
        let id = self.senders.len();
        let (sender, receiver, monitor) = pipe(id, region, self.capacity);
        self.senders.push(sender);
        Ok((receiver, monitor))
    }

    /// Read one frame and deliver it to every live pipe.
    ///
    /// Returns `Ok(false)` once distribution is over: either the source is
    /// exhausted (pipes are sealed so consumers drain and stop) or no live
    /// pipe remains. A source read failure is fatal and never retried.
    pub fn step(&mut self) -> Result<bool, ForkError> {
        self.started = true;

        if !self.senders.iter().any(PipeSender::is_open) {
            debug!("no live pipes remain; stopping distribution");
            return Ok(false);
        }

        let mut frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(
                    frames = self.next_sequence,
                    "source exhausted; sealing pipes"
                );
                self.close_all();
                return Ok(false);
            }
            Err(err) => return Err(ForkError::Source(err)),
        };

        let step_start = Instant::now();
        frame.sequence_id = self.next_sequence;
        self.next_sequence += 1;
        let frame = Arc::new(frame);
        let _step_span = debug_span!("fork.step", frame = frame.sequence_id).entered();

        for sender in &self.senders {
            if !sender.is_open() {
                continue;
            }
            if self.synchronized {
                if sender.push(Arc::clone(&frame)).is_err() {
                    // aborted mid-wait; out of the barrier from here on
                    debug!(pipe = sender.name(), "pipe left the barrier");
                }
            } else {
                match sender.try_push(Arc::clone(&frame)) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.dropped += 1;
                        metrics::counter!("scan_fork_dropped_frames_total").increment(1);
                        warn!(
                            pipe = sender.name(),
                            frame = frame.sequence_id,
                            "pipe full, frame skipped"
                        );
                    }
                    Err(_) => {
                        debug!(pipe = sender.name(), "pipe left the fan-out");
                    }
                }
            }
            metrics::gauge!("scan_pipe_queue_depth", "pipe" => sender.name().to_owned())
                .set(sender.queue_len() as f64);
        }

        metrics::counter!("scan_frames_distributed_total").increment(1);
        metrics::histogram!("scan_fork_step_seconds").record(step_start.elapsed().as_secs_f64());
        Ok(true)
    }

    /// Seal every pipe that is still accepting frames; their consumers
    /// drain the buffers and then see end-of-stream.
    fn close_all(&mut self) {
        for sender in self.senders.drain(..) {
            sender.close();
        }
    }

    /// Frames read and distributed so far.
    pub fn frames_distributed(&self) -> u64 {
        self.next_sequence
    }

    /// Frames skipped because a pipe was full (unsynchronized mode only).
    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pipe_count(&self) -> usize {
        self.senders.len()
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}
