//! Fan-out distribution of a sequential frame stream.
//!
//! One producer pulls frames from a `FrameSource` and a [`FrameFork`]
//! hands each frame to every registered pipe in lock step, so workers
//! assigned to different image regions stay on the same frame index. The
//! [`Supervisor`] owns the whole assembly: it drives the fork, polls worker
//! liveness, and keeps shutdown orderly even when a worker dies mid-stream.

mod fork;
mod pipe;
mod region;
mod supervisor;
mod telemetry;
mod worker;

pub use fork::{ForkError, FrameFork};
pub use pipe::{PipeClosed, PipeEnded, PipeMonitor, PipeReceiver, PipeSender, PipeState, pipe};
pub use region::{RegionSpec, quadrant_regions};
pub use supervisor::{
    DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL, RunOutcome, RunReport, StateHandle, Supervisor,
    SupervisorOptions, SupervisorState,
};
pub use worker::{FrameSink, WorkerHandle, spawn_worker};
