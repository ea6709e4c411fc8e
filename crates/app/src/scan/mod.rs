//! The `scan` command: fan one video stream out to four quadrant analyzers.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: source selection and supervisor wiring.
//! - `transform`: rectangular crop and channel extraction.
//! - `profiler`: streaming per-quadrant statistics sink.

pub use config::{ScanConfig, SourceKind};
pub use pipeline::{run, run_from_args};

mod config;
mod pipeline;
mod profiler;
mod transform;
