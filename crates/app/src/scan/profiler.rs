//! Streaming per-quadrant statistics: the stand-in analysis stage each
//! worker feeds its cropped stream into.

use anyhow::Result;
use frame_pipe::FrameSink;
use tracing::{info, trace};
use video_ingest::Frame;

/// Pixels at or below this value count as burrow-dark.
const DARK_THRESHOLD: u8 = 60;

/// Accumulates intensity, darkness, and frame-to-frame motion for one
/// quadrant stream. Totals are logged once the stream ends.
pub struct QuadrantProfiler {
    name: String,
    frames: u64,
    intensity_sum: f64,
    dark_sum: f64,
    motion_sum: f64,
    peak_motion: Option<(u64, f64)>,
    previous: Option<Vec<u8>>,
}

impl QuadrantProfiler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            intensity_sum: 0.0,
            dark_sum: 0.0,
            motion_sum: 0.0,
            peak_motion: None,
            previous: None,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Mean pixel intensity over all frames seen so far, 0..=255.
    pub fn mean_intensity(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.intensity_sum / self.frames as f64
    }

    /// Mean fraction of pixels at or below the darkness threshold.
    pub fn dark_fraction(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.dark_sum / self.frames as f64
    }

    /// Mean absolute per-pixel change between consecutive frames, 0..=1.
    pub fn mean_motion(&self) -> f64 {
        if self.frames < 2 {
            return 0.0;
        }
        self.motion_sum / (self.frames - 1) as f64
    }

    /// Sequence id of the most active frame transition observed.
    pub fn peak_motion_frame(&self) -> Option<u64> {
        self.peak_motion.map(|(sequence_id, _)| sequence_id)
    }
}

impl FrameSink for QuadrantProfiler {
    fn process(&mut self, frame: &Frame) -> Result<()> {
        let pixels = frame.data.len();
        let (mut intensity, mut dark) = (0.0, 0.0);
        if pixels > 0 {
            let sum: u64 = frame.data.iter().map(|&v| u64::from(v)).sum();
            let dark_count = frame.data.iter().filter(|&&v| v <= DARK_THRESHOLD).count();
            intensity = sum as f64 / pixels as f64;
            dark = dark_count as f64 / pixels as f64;
        }

        if let Some(previous) = &self.previous {
            if previous.len() == pixels && pixels > 0 {
                let delta: u64 = previous
                    .iter()
                    .zip(&frame.data)
                    .map(|(&a, &b)| u64::from(a.abs_diff(b)))
                    .sum();
                let motion = delta as f64 / (pixels as f64 * 255.0);
                self.motion_sum += motion;
                if self.peak_motion.map_or(true, |(_, peak)| motion > peak) {
                    self.peak_motion = Some((frame.sequence_id, motion));
                }
            }
        }

        self.frames += 1;
        self.intensity_sum += intensity;
        self.dark_sum += dark;
        self.previous = Some(frame.data.clone());

        metrics::gauge!("scan_region_mean_intensity", "region" => self.name.clone())
            .set(self.mean_intensity());
        metrics::gauge!("scan_region_dark_fraction", "region" => self.name.clone())
            .set(self.dark_fraction());
        metrics::counter!("scan_frames_analyzed_total", "region" => self.name.clone()).increment(1);
        trace!(
            region = self.name.as_str(),
            frame = frame.sequence_id,
            intensity,
            dark,
        );

        Ok(())
    }

    fn finish(&mut self) {
        info!(
            region = self.name.as_str(),
            frames = self.frames(),
            "quadrant summary: intensity {:.1}, dark {:.1}%, motion {:.4}, peak at frame {}",
            self.mean_intensity(),
            self.dark_fraction() * 100.0,
            self.mean_motion(),
            self.peak_motion_frame()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    fn frame(sequence_id: u64, data: Vec<u8>) -> Frame {
        Frame {
            sequence_id,
            data,
            width: 2,
            height: 2,
            timestamp_ms: 0,
            format: FrameFormat::Gray8,
        }
    }

    #[test]
    fn accumulates_intensity_and_darkness() {
        let mut profiler = QuadrantProfiler::new("UL");
        profiler.process(&frame(0, vec![0, 0, 200, 200])).unwrap();
        profiler.process(&frame(1, vec![100, 100, 100, 100])).unwrap();

        assert_eq!(profiler.frames(), 2);
        assert!((profiler.mean_intensity() - 100.0).abs() < 1e-9);
        // frame 0: half dark; frame 1: nothing dark
        assert!((profiler.dark_fraction() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn motion_tracks_frame_to_frame_change() {
        let mut profiler = QuadrantProfiler::new("DR");
        profiler.process(&frame(0, vec![0, 0, 0, 0])).unwrap();
        profiler.process(&frame(1, vec![0, 0, 0, 0])).unwrap();
        assert_eq!(profiler.mean_motion(), 0.0);
        assert_eq!(profiler.peak_motion_frame(), Some(1));

        profiler.process(&frame(2, vec![255, 255, 255, 255])).unwrap();
        assert!(profiler.mean_motion() > 0.0);
        assert_eq!(profiler.peak_motion_frame(), Some(2));
    }

    #[test]
    fn empty_stream_reports_zeroes() {
        let mut profiler = QuadrantProfiler::new("UR");
        assert_eq!(profiler.frames(), 0);
        assert_eq!(profiler.mean_intensity(), 0.0);
        assert_eq!(profiler.dark_fraction(), 0.0);
        assert_eq!(profiler.peak_motion_frame(), None);
        profiler.finish();
    }
}
