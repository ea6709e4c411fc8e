//! Worker threads: pop from a pipe, apply the region transform, feed the
//! analysis sink.
//!
//! A worker owns the consumer end of exactly one pipe. It never aborts the
//! pipe itself; a crash or sink failure simply ends the thread, and the
//! supervisor notices through liveness polling.

use std::{io, sync::Mutex, thread::JoinHandle};

use anyhow::{Result, anyhow};
use tracing::{debug, error};
use video_ingest::Frame;

use crate::{pipe::PipeReceiver, telemetry};

/// Per-quadrant analysis collaborator driven by a worker thread.
///
/// `process` sees every frame of the worker's region stream, in order.
/// `finish` runs once after a clean end-of-stream, before the thread exits;
/// it is skipped when the worker dies on an error.
pub trait FrameSink: Send {
    fn process(&mut self, frame: &Frame) -> Result<()>;

    fn finish(&mut self) {}
}

/// Join handle plus identity, shared between the supervisor loop and the
/// liveness monitor thread.
pub struct WorkerHandle {
    name: String,
    pipe_id: usize,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl WorkerHandle {
    /// Non-blocking liveness probe.
    pub fn is_finished(&self) -> bool {
        match self.handle.lock() {
            Ok(guard) => guard.as_ref().map(JoinHandle::is_finished).unwrap_or(true),
            Err(_) => true,
        }
    }

    /// Join the thread if it already finished. `None` while it is still
    /// running or once it has been joined. A panic is reported as an error
    /// outcome.
    pub fn join_finished(&self) -> Option<Result<()>> {
        let mut guard = self.handle.lock().ok()?;
        if !guard.as_ref().map(JoinHandle::is_finished).unwrap_or(false) {
            return None;
        }
        let handle = guard.take()?;
        Some(match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("worker thread panicked")),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipe_id(&self) -> usize {
        self.pipe_id
    }
}

/// Spawn a worker thread consuming `receiver`.
///
/// `transform` is the pure region transform (frame in, derived frame out);
/// `sink` is the analysis collaborator receiving the derived stream.
pub fn spawn_worker<T, S>(receiver: PipeReceiver, transform: T, sink: S) -> io::Result<WorkerHandle>
where
    T: Fn(&Frame) -> Result<Frame> + Send + 'static,
    S: FrameSink + 'static,
{
    let name = format!("scan-{}", receiver.name());
    let pipe_id = receiver.id();
    let handle = telemetry::spawn_thread(name.clone(), move || {
        worker_loop(receiver, transform, sink)
    })?;
    Ok(WorkerHandle {
        name,
        pipe_id,
        handle: Mutex::new(Some(handle)),
    })
}

fn worker_loop<T, S>(receiver: PipeReceiver, transform: T, mut sink: S) -> Result<()>
where
    T: Fn(&Frame) -> Result<Frame>,
    S: FrameSink,
{
    let mut processed: u64 = 0;
    loop {
        let frame = match receiver.pop() {
            Ok(frame) => frame,
            Err(_) => break,
        };

        let derived = match transform(&frame) {
            Ok(derived) => derived,
            Err(err) => {
                error!(
                    pipe = receiver.name(),
                    frame = frame.sequence_id,
                    "region transform failed: {err:?}"
                );
                return Err(err);
            }
        };

        if let Err(err) = sink.process(&derived) {
            error!(
                pipe = receiver.name(),
                frame = frame.sequence_id,
                "analysis sink failed: {err:?}"
            );
            return Err(err);
        }
        processed += 1;
    }

    debug!(
        pipe = receiver.name(),
        frames = processed,
        "stream ended, worker stopping"
    );
    sink.finish();
    Ok(())
}
