//! Pipeline supervisor: drives the fork, watches worker liveness, and turns
//! interrupts into a coordinated abort across all pipes.
//!
//! State machine: `Starting → Running → Draining → Stopped`. While Running
//! the supervisor loops over [`FrameFork::step`]; a separate monitor thread
//! sweeps worker liveness on a short interval, so a fork blocked inside a
//! barrier push is released within one interval of a worker dying or an
//! interrupt arriving. A single dead worker only costs its own pipe; the
//! stream keeps flowing to the survivors.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};
use video_ingest::FrameSource;

use crate::{
    fork::FrameFork,
    pipe::{PipeMonitor, PipeReceiver},
    region::RegionSpec,
    telemetry,
    worker::WorkerHandle,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SupervisorState::Starting,
            1 => SupervisorState::Running,
            2 => SupervisorState::Draining,
            _ => SupervisorState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SupervisorState::Starting => 0,
            SupervisorState::Running => 1,
            SupervisorState::Draining => 2,
            SupervisorState::Stopped => 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Per-pipe frame buffer, at least 1.
    pub capacity: usize,
    /// Barrier delivery (true) or best-effort fan-out.
    pub synchronized: bool,
    /// Cadence of liveness and interrupt detection.
    pub poll_interval: Duration,
    /// How long Draining waits for workers before abandoning them.
    pub grace_period: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            capacity: 1,
            synchronized: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Shareable read-only view of the supervisor lifecycle.
#[derive(Clone)]
pub struct StateHandle(Arc<AtomicU8>);

impl StateHandle {
    pub fn get(&self) -> SupervisorState {
        SupervisorState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Source exhausted; every pipe drained.
    Completed,
    /// The external interrupt flag stopped the run.
    Interrupted,
    /// The source failed mid-read; all pipes were aborted.
    SourceFailed,
}

/// Outcome of a completed run, for callers and tests.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub frames_distributed: u64,
    /// Frames skipped for saturated pipes; stays 0 in synchronized mode.
    pub frames_dropped: u64,
    /// Workers that exited on their own, without error.
    pub completed: usize,
    /// Workers that exited with an error or panic.
    pub failed: usize,
    /// Workers abandoned after the grace period.
    pub forced: usize,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.failed == 0 && self.forced == 0
    }
}

/// Owns the fork, all pipe monitors, and all worker handles.
pub struct Supervisor {
    fork: FrameFork,
    monitors: Vec<PipeMonitor>,
    workers: Vec<Arc<WorkerHandle>>,
    interrupt: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    options: SupervisorOptions,
}

impl Supervisor {
    /// Register one pipe per region and launch its worker through `spawn`.
    ///
    /// `interrupt` is the external cancellation flag, typically set from a
    /// signal handler; the supervisor only ever reads it.
    pub fn start<F>(
        source: Box<dyn FrameSource>,
        regions: Vec<RegionSpec>,
        interrupt: Arc<AtomicBool>,
        options: SupervisorOptions,
        mut spawn: F,
    ) -> Result<Self>
    where
        F: FnMut(&RegionSpec, PipeReceiver) -> Result<WorkerHandle>,
    {
        anyhow::ensure!(!regions.is_empty(), "at least one region is required");

        let mut fork = FrameFork::new(source, options.capacity, options.synchronized);
        let mut monitors = Vec::with_capacity(regions.len());
        let mut workers = Vec::with_capacity(regions.len());
        for region in regions {
            let (receiver, monitor) = fork.register(region.clone())?;
            let worker = spawn(&region, receiver)
                .with_context(|| format!("failed to launch worker {}", region.name))?;
            monitors.push(monitor);
            workers.push(Arc::new(worker));
        }
        debug!(workers = workers.len(), "pipeline assembled");

        Ok(Self {
            fork,
            monitors,
            workers,
            interrupt,
            state: Arc::new(AtomicU8::new(SupervisorState::Starting.as_u8())),
            options,
        })
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn state_handle(&self) -> StateHandle {
        StateHandle(Arc::clone(&self.state))
    }

    /// Monitor clones for observing pipes from outside the supervisor.
    pub fn pipe_monitors(&self) -> Vec<PipeMonitor> {
        self.monitors.clone()
    }

    /// Distribute until the source ends, every worker is gone, or the
    /// interrupt flag is raised; then drain and join the workers.
    pub fn run(mut self) -> Result<RunReport> {
        self.publish(SupervisorState::Running);

        let stop_monitor = Arc::new(AtomicBool::new(false));
        let monitor_thread = spawn_liveness_monitor(
            self.workers.clone(),
            self.monitors.clone(),
            Arc::clone(&self.interrupt),
            Arc::clone(&stop_monitor),
            self.options.poll_interval,
        )
        .context("failed to spawn the liveness monitor")?;

        let mut outcome = RunOutcome::Completed;
        loop {
            if self.interrupt.load(Ordering::Relaxed) {
                debug!("interrupt flagged, stopping distribution");
                outcome = RunOutcome::Interrupted;
                break;
            }
            match self.fork.step() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    error!("fatal source failure: {err}");
                    outcome = RunOutcome::SourceFailed;
                    break;
                }
            }
            sweep_dead_workers(&self.workers, &self.monitors);
            if self.workers.iter().all(|worker| worker.is_finished()) {
                debug!("no worker left alive, stopping distribution");
                break;
            }
        }

        self.publish(SupervisorState::Draining);
        if outcome != RunOutcome::Completed {
            // exhaustion seals pipes gracefully inside the fork; anything
            // else discards in-flight frames
            self.abort_all();
        }

        stop_monitor.store(true, Ordering::SeqCst);
        let _ = monitor_thread.join();

        let (completed, failed, forced) = self.join_with_grace();
        self.publish(SupervisorState::Stopped);

        let report = RunReport {
            outcome,
            frames_distributed: self.fork.frames_distributed(),
            frames_dropped: self.fork.frames_dropped(),
            completed,
            failed,
            forced,
        };
        debug!(?report, "pipeline stopped");
        Ok(report)
    }

    fn publish(&self, state: SupervisorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
        metrics::gauge!("scan_supervisor_state").set(state.as_u8() as f64);
    }

    fn abort_all(&self) {
        for monitor in &self.monitors {
            if monitor.abort() {
                metrics::counter!("scan_pipes_aborted_total").increment(1);
            }
        }
    }

    /// Join every worker, waiting at most the grace period; stragglers are
    /// abandoned and reported as forced.
    fn join_with_grace(&self) -> (usize, usize, usize) {
        let deadline = Instant::now() + self.options.grace_period;
        let mut completed = 0;
        let mut failed = 0;
        let mut pending: Vec<Arc<WorkerHandle>> = self.workers.clone();

        loop {
            pending.retain(|worker| match worker.join_finished() {
                Some(Ok(())) => {
                    debug!(worker = worker.name(), "worker stopped cleanly");
                    completed += 1;
                    false
                }
                Some(Err(err)) => {
                    error!(worker = worker.name(), "worker failed: {err:?}");
                    failed += 1;
                    false
                }
                None => true,
            });
            if pending.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.options.poll_interval);
        }

        let forced = pending.len();
        for worker in &pending {
            warn!(
                worker = worker.name(),
                "worker still running after the grace period, abandoning it"
            );
            metrics::counter!("scan_workers_forced_total").increment(1);
        }
        (completed, failed, forced)
    }
}

/// Abort the pipe of any worker that died while its pipe still runs, so a
/// blocked barrier push cannot outlive its consumer.
fn sweep_dead_workers(workers: &[Arc<WorkerHandle>], monitors: &[PipeMonitor]) {
    for (worker, monitor) in workers.iter().zip(monitors) {
        if worker.is_finished() && monitor.is_running() {
            warn!(
                worker = worker.name(),
                pipe = monitor.name(),
                "worker died, aborting its pipe"
            );
            if monitor.abort() {
                metrics::counter!("scan_pipes_aborted_total").increment(1);
            }
        }
    }
}

fn spawn_liveness_monitor(
    workers: Vec<Arc<WorkerHandle>>,
    monitors: Vec<PipeMonitor>,
    interrupt: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("scan-liveness", move || {
        let mut interrupt_seen = false;
        while !stop.load(Ordering::Relaxed) {
            if !interrupt_seen && interrupt.load(Ordering::Relaxed) {
                interrupt_seen = true;
                debug!("interrupt observed, aborting all pipes");
                for monitor in &monitors {
                    if monitor.abort() {
                        metrics::counter!("scan_pipes_aborted_total").increment(1);
                    }
                }
            }
            sweep_dead_workers(&workers, &monitors);
            thread::sleep(poll_interval);
        }
    })
}
