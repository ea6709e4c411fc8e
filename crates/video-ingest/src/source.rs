//! Pull interface for frame producers, plus a deterministic synthetic source
//! used by the demo binary and the concurrency tests.

use chrono::Utc;

use crate::types::{Frame, FrameFormat, SourceError};

/// A sequential frame producer with exactly one reader.
///
/// `next_frame` yields `Ok(None)` on clean exhaustion. Any error is fatal:
/// the caller must not retry the read. Implementations are driven from a
/// single thread; pacing and buffering belong to the caller.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Index of the frame the next `next_frame` call would yield.
    fn position(&self) -> u64;

    /// Reposition the stream so the next read yields `position`.
    ///
    /// Sources backed by pipes cannot seek and return
    /// [`SourceError::SeekUnsupported`].
    fn seek(&mut self, position: u64) -> Result<(), SourceError>;
}

/// Procedural BGR frames: a fixed gradient with a dark block sweeping
/// across the image, so downstream statistics have something to measure.
/// Fully deterministic for a given geometry and sequence index.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    total: u64,
    position: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, total: u64) -> Self {
        Self {
            width,
            height,
            total,
            position: 0,
        }
    }

    fn render(&self, sequence_id: u64) -> Frame {
        let (width, height) = (self.width, self.height);
        let block_width = (width / 4).max(1);
        let block_start = (sequence_id % width.max(1) as u64) as u32;
        let block_end = (block_start + block_width).min(width);

        let mut data = vec![0u8; width as usize * height as usize * 3];
        for y in 0..height {
            for x in 0..width {
                let idx = ((y * width + x) * 3) as usize;
                if x >= block_start && x < block_end {
                    data[idx..idx + 3].fill(12);
                } else {
                    data[idx] = (x * 255 / width.max(1)) as u8;
                    data[idx + 1] = (y * 255 / height.max(1)) as u8;
                    data[idx + 2] = (sequence_id % 256) as u8;
                }
            }
        }

        Frame {
            sequence_id,
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.position >= self.total {
            return Ok(None);
        }
        let frame = self.render(self.position);
        self.position += 1;
        Ok(Some(frame))
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, position: u64) -> Result<(), SourceError> {
        self.position = position.min(self.total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_exactly_total_frames_in_sequence() {
        let mut source = SyntheticSource::new(8, 6, 5);
        for expected in 0..5 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.sequence_id, expected);
            assert_eq!(frame.data.len(), frame.expected_len());
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.position(), 5);
    }

    #[test]
    fn frames_are_deterministic_per_sequence() {
        let mut a = SyntheticSource::new(16, 8, 3);
        let mut b = SyntheticSource::new(16, 8, 3);
        for _ in 0..3 {
            let fa = a.next_frame().unwrap().unwrap();
            let fb = b.next_frame().unwrap().unwrap();
            assert_eq!(fa.data, fb.data);
        }
    }

    #[test]
    fn seek_rewinds_the_stream() {
        let mut source = SyntheticSource::new(8, 8, 4);
        while source.next_frame().unwrap().is_some() {}
        source.seek(0).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!(frame.sequence_id, 0);
    }
}
