//! Frame data types and pull-based video sources.
//!
//! This crate exposes a single-reader pull interface ([`FrameSource`])
//! rather than a background capture thread: the fork in `frame-pipe` is the
//! sole reader and owns pacing, so backpressure lives in its pipes instead
//! of an extra queue here.

mod ffmpeg;
mod source;
mod types;

pub use ffmpeg::FfmpegSource;
pub use source::{FrameSource, SyntheticSource};
pub use types::{Frame, FrameFormat, SourceError};
