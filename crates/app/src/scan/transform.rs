//! Rectangular crop and channel extraction applied per quadrant.

use frame_pipe::RegionSpec;
use thiserror::Error;
use video_ingest::{Frame, FrameFormat};

#[derive(Debug, Error)]
pub enum RegionError {
    #[error("region {name} ({x},{y} {width}x{height}) does not fit a {frame_width}x{frame_height} frame")]
    OutOfBounds {
        name: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("region {name} selects channel {channel} but the frame has {channels}")]
    BadChannel {
        name: String,
        channel: u32,
        channels: u32,
    },
    #[error("frame {sequence_id} carries {actual} bytes, expected {expected}")]
    Malformed {
        sequence_id: u64,
        actual: usize,
        expected: usize,
    },
}

/// Cut `region` out of `frame` into a new frame, optionally keeping a single
/// interleaved channel. The input is never modified; the output keeps the
/// sequence id and timestamp of its parent.
pub fn crop_region(frame: &Frame, region: &RegionSpec) -> Result<Frame, RegionError> {
    if frame.data.len() != frame.expected_len() {
        return Err(RegionError::Malformed {
            sequence_id: frame.sequence_id,
            actual: frame.data.len(),
            expected: frame.expected_len(),
        });
    }
    let fits_x = u64::from(region.x) + u64::from(region.width) <= u64::from(frame.width);
    let fits_y = u64::from(region.y) + u64::from(region.height) <= u64::from(frame.height);
    if !fits_x || !fits_y {
        return Err(RegionError::OutOfBounds {
            name: region.name.clone(),
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            frame_width: frame.width,
            frame_height: frame.height,
        });
    }

    let channels = frame.channel_count() as usize;
    if let Some(channel) = region.color_channel {
        if channel >= frame.channel_count() {
            return Err(RegionError::BadChannel {
                name: region.name.clone(),
                channel,
                channels: frame.channel_count(),
            });
        }
    }

    let x0 = region.x as usize;
    let x1 = x0 + region.width as usize;
    let (format, mut data) = match region.color_channel {
        None => (
            frame.format,
            Vec::with_capacity(region.width as usize * region.height as usize * channels),
        ),
        Some(_) => (
            FrameFormat::Gray8,
            Vec::with_capacity(region.width as usize * region.height as usize),
        ),
    };

    for y in region.y..region.y + region.height {
        let row = frame.row(y);
        match region.color_channel {
            None => data.extend_from_slice(&row[x0 * channels..x1 * channels]),
            Some(channel) => {
                let channel = channel as usize;
                for px in x0..x1 {
                    data.push(row[px * channels + channel]);
                }
            }
        }
    }

    Ok(Frame {
        sequence_id: frame.sequence_id,
        data,
        width: region.width,
        height: region.height,
        timestamp_ms: frame.timestamp_ms,
        format,
    })
}
