//! Synthetic frame source for headless recording and tests

use std::sync::atomic::{AtomicU64, Ordering};

use super::FrameSource;
use crate::config::Resolution;
use crate::error::RecordResult;
use crate::frame::{Frame, PixelFormat};

/// Moving colour gradient in BGRA, shifted by a few pixels per capture
pub struct PatternSource {
    resolution: Resolution,
    tick: AtomicU64,
}

impl PatternSource {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            tick: AtomicU64::new(0),
        }
    }
}

impl FrameSource for PatternSource {
    fn capture(&self) -> RecordResult<Frame> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Frame::new(width, height, PixelFormat::Bgra8, Vec::new());
        }
        let shift = (tick * 4 % width as u64) as u32;

        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let r = ((x + shift) % width * 255 / width) as u8;
                let g = (y * 255 / height) as u8;
                let b = (tick % 256) as u8;
                // BGRA
                data.extend_from_slice(&[b, g, r, 255]);
            }
        }

        Frame::new(width, height, PixelFormat::Bgra8, data)
    }

    fn native_resolution(&self) -> RecordResult<Resolution> {
        Ok(self.resolution)
    }
}
