//! Bounded single-producer/single-consumer frame transport with explicit
//! liveness and abort.
//!
//! A pipe is created in three parts: the [`PipeSender`] held by the fork,
//! the [`PipeReceiver`] moved into a worker thread, and the [`PipeMonitor`]
//! the supervisor polls and aborts through. Frames travel as `Arc<Frame>` so
//! all pipes of a fork share one buffer per frame.
//!
//! Cancellation rides a second, never-written channel: `abort()` drops its
//! sender, which makes the receiver ready on both endpoints and wakes a
//! blocked `push` or `pop` out of `select!` without any polling.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use thiserror::Error;
use tracing::debug;
use video_ingest::Frame;

use crate::region::RegionSpec;

/// Producer-side failure: the pipe was aborted or the consumer is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("pipe closed")]
pub struct PipeClosed;

/// Consumer-side end-of-stream: no further frames will arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("pipe ended")]
pub struct PipeEnded;

/// Lifecycle of a pipe.
///
/// `Running → Draining → Closed` is the graceful path (producer sealed the
/// pipe, consumer drains the buffer); any state may jump to `Aborted`, which
/// discards buffered frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipeState {
    Running,
    Draining,
    Aborted,
    Closed,
}

impl PipeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PipeState::Running,
            1 => PipeState::Draining,
            2 => PipeState::Aborted,
            _ => PipeState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipeState::Running => 0,
            PipeState::Draining => 1,
            PipeState::Aborted => 2,
            PipeState::Closed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipeState::Aborted | PipeState::Closed)
    }
}

struct PipeShared {
    id: usize,
    region: RegionSpec,
    capacity: usize,
    state: AtomicU8,
    delivered: AtomicU64,
    last_sequence: AtomicI64,
    /// Dropping this sender closes the abort channel and wakes both ends.
    abort_tx: Mutex<Option<Sender<()>>>,
    /// Receiver clone used to discard buffered frames on abort.
    frame_rx: Receiver<Arc<Frame>>,
}

impl PipeShared {
    fn state(&self) -> PipeState {
        PipeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn drain_buffer(&self) {
        while self.frame_rx.try_recv().is_ok() {}
    }

    /// A frame landed in the buffer. Confirm the consumer will see it, or
    /// sweep it back out if an abort won the race.
    fn confirm_delivery(&self, sequence_id: u64) -> bool {
        if self.state() == PipeState::Aborted {
            self.drain_buffer();
            return false;
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.last_sequence
            .store(sequence_id as i64, Ordering::Relaxed);
        true
    }

    /// `Running → Draining`; no-op once aborted or closed.
    fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            PipeState::Running.as_u8(),
            PipeState::Draining.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Terminal graceful state, reached by the consumer once the buffer is
    /// drained. Does not overwrite an abort.
    fn mark_closed(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                if PipeState::from_u8(raw) == PipeState::Aborted {
                    None
                } else {
                    Some(PipeState::Closed.as_u8())
                }
            });
    }

    /// Returns true for the exactly-one caller that performs the transition.
    fn mark_aborted(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                if PipeState::from_u8(raw).is_terminal() {
                    None
                } else {
                    Some(PipeState::Aborted.as_u8())
                }
            })
            .is_ok()
    }

    fn abort(&self) -> bool {
        if !self.mark_aborted() {
            return false;
        }
        if let Ok(mut guard) = self.abort_tx.lock() {
            guard.take();
        }
        self.drain_buffer();
        debug!(pipe = self.region.name.as_str(), "pipe aborted");
        true
    }
}

/// Producer end, held by the fork.
pub struct PipeSender {
    shared: Arc<PipeShared>,
    frame_tx: Sender<Arc<Frame>>,
    abort_rx: Receiver<()>,
}

impl PipeSender {
    /// Blocking delivery. Waits for buffer space, fails once the pipe is
    /// aborted or the consumer end is gone. An abort arriving mid-wait wakes
    /// the call.
    pub fn push(&self, frame: Arc<Frame>) -> Result<(), PipeClosed> {
        if self.shared.state() != PipeState::Running {
            return Err(PipeClosed);
        }
        let sequence_id = frame.sequence_id;
        select! {
            send(self.frame_tx, frame) -> res => match res {
                Ok(()) => {
                    if self.shared.confirm_delivery(sequence_id) {
                        Ok(())
                    } else {
                        Err(PipeClosed)
                    }
                }
                Err(_) => Err(PipeClosed),
            },
            recv(self.abort_rx) -> _ => Err(PipeClosed),
        }
    }

    /// Non-blocking delivery for the unsynchronized fork mode: a full pipe
    /// misses the frame instead of stalling the producer. `Ok(true)` means
    /// the frame was accepted.
    pub fn try_push(&self, frame: Arc<Frame>) -> Result<bool, PipeClosed> {
        if self.shared.state() != PipeState::Running {
            return Err(PipeClosed);
        }
        let sequence_id = frame.sequence_id;
        match self.frame_tx.try_send(frame) {
            Ok(()) => {
                if self.shared.confirm_delivery(sequence_id) {
                    Ok(true)
                } else {
                    Err(PipeClosed)
                }
            }
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(PipeClosed),
        }
    }

    /// Seal the producer side: the consumer drains whatever is buffered,
    /// then observes end-of-stream.
    pub fn close(self) {
        self.shared.mark_draining();
        // dropping self releases the frame sender
    }

    /// False once the pipe stopped accepting frames.
    pub fn is_open(&self) -> bool {
        self.shared.state() == PipeState::Running
    }

    pub fn name(&self) -> &str {
        &self.shared.region.name
    }

    /// Frames currently buffered, for queue-depth gauges.
    pub fn queue_len(&self) -> usize {
        self.frame_tx.len()
    }
}

/// Consumer end, moved into a worker thread.
pub struct PipeReceiver {
    shared: Arc<PipeShared>,
    frame_rx: Receiver<Arc<Frame>>,
    abort_rx: Receiver<()>,
}

impl PipeReceiver {
    /// Blocking receive. Drains buffered frames after a graceful close, then
    /// fails; fails immediately after an abort (buffered frames are
    /// discarded, not delivered).
    pub fn pop(&self) -> Result<Arc<Frame>, PipeEnded> {
        if self.shared.state() == PipeState::Aborted {
            return Err(PipeEnded);
        }
        select! {
            recv(self.frame_rx) -> res => match res {
                Ok(frame) => {
                    if self.shared.state() == PipeState::Aborted {
                        return Err(PipeEnded);
                    }
                    Ok(frame)
                }
                Err(_) => {
                    // producer gone and buffer empty
                    self.shared.mark_closed();
                    Err(PipeEnded)
                }
            },
            recv(self.abort_rx) -> _ => Err(PipeEnded),
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.region.name
    }

    pub fn region(&self) -> &RegionSpec {
        &self.shared.region
    }
}

/// Supervisor's view of a pipe: liveness probes and the abort switch.
#[derive(Clone)]
pub struct PipeMonitor {
    shared: Arc<PipeShared>,
}

impl PipeMonitor {
    /// Idempotent cancel, safe to call concurrently with an in-flight
    /// `push`/`pop` and from multiple threads. Returns true for the single
    /// call that performed the transition.
    pub fn abort(&self) -> bool {
        self.shared.abort()
    }

    /// Non-blocking liveness probe: true in `Running` and `Draining`.
    pub fn is_running(&self) -> bool {
        !self.shared.state().is_terminal()
    }

    pub fn state(&self) -> PipeState {
        self.shared.state()
    }

    /// Frames accepted by the producer so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Sequence id of the newest accepted frame, if any.
    pub fn last_delivered_seq(&self) -> Option<u64> {
        let raw = self.shared.last_sequence.load(Ordering::Relaxed);
        (raw >= 0).then_some(raw as u64)
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.frame_rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.region.name
    }

    pub fn region(&self) -> &RegionSpec {
        &self.shared.region
    }
}

/// Build a pipe of the given capacity (clamped to at least one frame).
pub fn pipe(
    id: usize,
    region: RegionSpec,
    capacity: usize,
) -> (PipeSender, PipeReceiver, PipeMonitor) {
    let capacity = capacity.max(1);
    let (frame_tx, frame_rx) = bounded(capacity);
    let (abort_tx, abort_rx) = bounded::<()>(0);

    let shared = Arc::new(PipeShared {
        id,
        region,
        capacity,
        state: AtomicU8::new(PipeState::Running.as_u8()),
        delivered: AtomicU64::new(0),
        last_sequence: AtomicI64::new(-1),
        abort_tx: Mutex::new(Some(abort_tx)),
        frame_rx: frame_rx.clone(),
    });

    (
        PipeSender {
            shared: Arc::clone(&shared),
            frame_tx,
            abort_rx: abort_rx.clone(),
        },
        PipeReceiver {
            shared: Arc::clone(&shared),
            frame_rx,
            abort_rx,
        },
        PipeMonitor { shared },
    )
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use video_ingest::FrameFormat;

    use super::*;

    fn frame(sequence_id: u64) -> Arc<Frame> {
        Arc::new(Frame {
            sequence_id,
            data: vec![0; 12],
            width: 2,
            height: 2,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        })
    }

    fn region() -> RegionSpec {
        RegionSpec::new("UL", 0, 0, 2, 2)
    }

    #[test]
    fn frames_pass_through_in_order() {
        let (tx, rx, monitor) = pipe(0, region(), 4);
        for seq in 0..4 {
            tx.push(frame(seq)).unwrap();
        }
        for seq in 0..4 {
            assert_eq!(rx.pop().unwrap().sequence_id, seq);
        }
        assert_eq!(monitor.delivered(), 4);
        assert_eq!(monitor.last_delivered_seq(), Some(3));
    }

    #[test]
    fn close_drains_then_ends_closed() {
        let (tx, rx, monitor) = pipe(0, region(), 4);
        tx.push(frame(0)).unwrap();
        tx.push(frame(1)).unwrap();
        tx.close();

        assert_eq!(monitor.state(), PipeState::Draining);
        assert!(monitor.is_running());

        assert_eq!(rx.pop().unwrap().sequence_id, 0);
        assert_eq!(rx.pop().unwrap().sequence_id, 1);
        assert_eq!(rx.pop().unwrap_err(), PipeEnded);
        assert_eq!(monitor.state(), PipeState::Closed);
        assert!(!monitor.is_running());
    }

    #[test]
    fn push_blocks_at_capacity_until_a_pop() {
        let (tx, rx, monitor) = pipe(0, region(), 1);
        tx.push(frame(0)).unwrap();

        let pusher = thread::spawn(move || {
            tx.push(frame(1)).unwrap();
            tx
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(monitor.delivered(), 1, "second push must wait for space");

        assert_eq!(rx.pop().unwrap().sequence_id, 0);
        let tx = pusher.join().unwrap();
        assert_eq!(monitor.delivered(), 2);
        assert_eq!(rx.pop().unwrap().sequence_id, 1);
        drop(tx);
    }

    #[test]
    fn abort_wakes_a_blocked_push() {
        let (tx, _rx, monitor) = pipe(0, region(), 1);
        tx.push(frame(0)).unwrap();

        let pusher = thread::spawn(move || tx.push(frame(1)));
        thread::sleep(Duration::from_millis(20));
        monitor.abort();

        assert_eq!(pusher.join().unwrap(), Err(PipeClosed));
        assert_eq!(monitor.state(), PipeState::Aborted);
    }

    #[test]
    fn abort_wakes_a_blocked_pop() {
        let (_tx, rx, monitor) = pipe(0, region(), 1);

        let popper = thread::spawn(move || rx.pop());
        thread::sleep(Duration::from_millis(20));
        monitor.abort();

        assert_eq!(popper.join().unwrap(), Err(PipeEnded));
    }

    #[test]
    fn abort_discards_buffered_frames() {
        let (tx, rx, monitor) = pipe(0, region(), 4);
        tx.push(frame(0)).unwrap();
        tx.push(frame(1)).unwrap();

        monitor.abort();
        assert_eq!(monitor.queue_depth(), 0);
        assert_eq!(rx.pop().unwrap_err(), PipeEnded);
        assert_eq!(tx.push(frame(2)).unwrap_err(), PipeClosed);
    }

    #[test]
    fn concurrent_aborts_have_one_winner() {
        let (_tx, _rx, monitor) = pipe(0, region(), 1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let monitor = monitor.clone();
                thread::spawn(move || monitor.abort())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|winner| *winner)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(monitor.state(), PipeState::Aborted);

        assert!(!monitor.abort(), "late abort must be a no-op");
        assert_eq!(monitor.state(), PipeState::Aborted);
    }

    #[test]
    fn abort_during_drain_discards_the_rest() {
        let (tx, rx, monitor) = pipe(0, region(), 4);
        tx.push(frame(0)).unwrap();
        tx.push(frame(1)).unwrap();
        tx.close();

        assert_eq!(rx.pop().unwrap().sequence_id, 0);
        monitor.abort();
        assert_eq!(rx.pop().unwrap_err(), PipeEnded);
        assert_eq!(monitor.state(), PipeState::Aborted);
    }

    #[test]
    fn try_push_reports_full_without_blocking() {
        let (tx, rx, _monitor) = pipe(0, region(), 1);
        assert_eq!(tx.try_push(frame(0)), Ok(true));
        assert_eq!(tx.try_push(frame(1)), Ok(false));
        assert_eq!(rx.pop().unwrap().sequence_id, 0);
        assert_eq!(tx.try_push(frame(2)), Ok(true));
    }

    #[test]
    fn receiver_drop_is_invisible_until_abort() {
        // A vanished consumer is not a channel-level signal: the supervisor
        // notices the dead worker and aborts the pipe.
        let (tx, rx, monitor) = pipe(0, region(), 1);
        drop(rx);
        tx.push(frame(0)).unwrap();
        monitor.abort();
        assert_eq!(tx.push(frame(1)).unwrap_err(), PipeClosed);
    }
}
