//! Crop regions assigned to workers.

use serde::{Deserialize, Serialize};

/// Named rectangular region of a frame, with an optional color channel to
/// extract. Immutable configuration, fixed before the fork starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Interleaved channel index to keep (yielding a single-channel frame),
    /// or `None` to keep all channels.
    pub color_channel: Option<u32>,
}

impl RegionSpec {
    pub fn new(name: impl Into<String>, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            width,
            height,
            color_channel: None,
        }
    }

    pub fn with_color_channel(mut self, channel: u32) -> Self {
        self.color_channel = Some(channel);
        self
    }
}

/// The four quadrants of a `width` x `height` frame, in the fixed scan order
/// upper-left, lower-left, upper-right, lower-right.
///
/// Odd dimensions put the extra row/column in the lower/right half; the
/// quadrants are disjoint and cover the whole frame.
pub fn quadrant_regions(width: u32, height: u32) -> Vec<RegionSpec> {
    let mid_x = width / 2;
    let mid_y = height / 2;
    vec![
        RegionSpec::new("UL", 0, 0, mid_x, mid_y),
        RegionSpec::new("DL", 0, mid_y, mid_x, height - mid_y),
        RegionSpec::new("UR", mid_x, 0, width - mid_x, mid_y),
        RegionSpec::new("DR", mid_x, mid_y, width - mid_x, height - mid_y),
    ]
}
