//! Wires a video source into the quadrant fan-out and runs it to completion.
//!
//! The `scan` command builds one pipe per quadrant, hangs a cropping
//! transform and a [`QuadrantProfiler`] off each, and hands the assembly to
//! the supervisor. Ctrl+C flips the interrupt flag the supervisor polls.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use frame_pipe::{
    RunOutcome, Supervisor, SupervisorOptions, quadrant_regions, spawn_worker,
};
use tracing::{info, warn};
use video_ingest::{FfmpegSource, Frame, FrameSource, SyntheticSource};

use crate::scan::{
    config::{SCAN_USAGE, ScanConfig, SourceKind},
    profiler::QuadrantProfiler,
    transform::crop_region,
};

pub fn run_from_args(args: &[String]) -> Result<()> {
    if args.iter().skip(2).any(|arg| arg == "--help" || arg == "-h") {
        println!("{SCAN_USAGE}");
        return Ok(());
    }
    let config = ScanConfig::from_args(args)?;
    run(config)
}

/// Run one scan to completion: source → fork → four quadrant workers.
pub fn run(config: ScanConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_interrupt = interrupt.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_interrupt = handler_interrupt.clone();
            move || {
                handler_interrupt.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let span = tracing::info_span!(
        "scan.pipeline",
        source = %config.source,
        width = config.width,
        height = config.height,
        capacity = config.capacity,
        synchronized = config.synchronized,
    );
    let _span_guard = span.enter();

    if config.verbose {
        info!(?config, "scan configuration");
    }

    let source: Box<dyn FrameSource> = match config.source_kind {
        SourceKind::Synthetic => Box::new(SyntheticSource::new(
            config.width,
            config.height,
            config.frames,
        )),
        SourceKind::Stream => Box::new(
            FfmpegSource::open(&config.source, (config.width, config.height))
                .with_context(|| format!("Failed to open video source {}", config.source))?,
        ),
    };

    // frames arrive BGR from both sources; the analysis wants the green plane
    let regions: Vec<_> = quadrant_regions(config.width, config.height)
        .into_iter()
        .map(|region| region.with_color_channel(1))
        .collect();

    let options = SupervisorOptions {
        capacity: config.capacity,
        synchronized: config.synchronized,
        grace_period: Duration::from_millis(config.grace_ms),
        ..SupervisorOptions::default()
    };

    let supervisor = Supervisor::start(
        source,
        regions,
        Arc::clone(&interrupt),
        options,
        |region, receiver| {
            let spec = region.clone();
            let transform = move |frame: &Frame| Ok(crop_region(frame, &spec)?);
            let profiler = QuadrantProfiler::new(region.name.clone());
            Ok(spawn_worker(receiver, transform, profiler)?)
        },
    )?;

    info!(
        "Scanning {} into {} quadrant streams",
        config.source,
        supervisor.pipe_monitors().len()
    );
    let report = supervisor.run()?;

    if report.frames_dropped > 0 {
        warn!(
            dropped = report.frames_dropped,
            "saturated pipes shed frames during the run"
        );
    }
    if report.forced > 0 {
        warn!(
            forced = report.forced,
            "workers were abandoned after the grace period"
        );
    }

    match report.outcome {
        RunOutcome::Completed => {
            info!(
                frames = report.frames_distributed,
                completed = report.completed,
                "Scan finished"
            );
        }
        RunOutcome::Interrupted => {
            warn!(
                frames = report.frames_distributed,
                "Scan interrupted, streams aborted"
            );
        }
        RunOutcome::SourceFailed => {
            bail!(
                "video source failed after {} frames",
                report.frames_distributed
            );
        }
    }
    if report.failed > 0 {
        bail!("{} worker(s) failed mid-stream", report.failed);
    }

    Ok(())
}
