use anyhow::Error;
use thiserror::Error;

/// Raw frame pulled from a video source.
///
/// Frames are immutable once produced. The fork shares one allocation with
/// every consumer, so nothing downstream may write through it; transforms
/// that need different bytes allocate their own frame.
#[derive(Debug, PartialEq)]
pub struct Frame {
    /// Strictly increasing index stamped by the source, starting at 0.
    pub sequence_id: u64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time in milliseconds since the epoch.
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Interleaved channels per pixel, implied by the pixel format.
    pub fn channel_count(&self) -> u32 {
        self.format.channel_count()
    }

    /// Byte length `data` must have for the declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channel_count() as usize
    }

    /// One row of interleaved pixel data.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.channel_count() as usize;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Gray8,
}

impl FrameFormat {
    pub fn channel_count(self) -> u32 {
        match self {
            FrameFormat::Bgr8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to read frame {position} from video source")]
    Read {
        position: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("video source does not support seeking")]
    SeekUnsupported,
    #[error(transparent)]
    Other(#[from] Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame {
            sequence_id: 0,
            data: (0..width * height).map(|i| i as u8).collect(),
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Gray8,
        }
    }

    #[test]
    fn expected_len_accounts_for_channels() {
        let frame = gray_frame(4, 3);
        assert_eq!(frame.expected_len(), 12);
        assert_eq!(frame.data.len(), frame.expected_len());

        let bgr = Frame {
            format: FrameFormat::Bgr8,
            data: vec![0; 36],
            ..gray_frame(4, 3)
        };
        assert_eq!(bgr.expected_len(), 36);
    }

    #[test]
    fn row_slices_by_stride() {
        let frame = gray_frame(4, 3);
        assert_eq!(frame.row(0), &[0, 1, 2, 3]);
        assert_eq!(frame.row(2), &[8, 9, 10, 11]);
    }
}
