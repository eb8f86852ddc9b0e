//! Primary monitor capture through the `screenshots` crate

use screenshots::Screen;

use super::FrameSource;
use crate::config::Resolution;
use crate::error::{RecordError, RecordResult};
use crate::frame::{Frame, PixelFormat};

/// Captures the primary display (or the first one if none is marked primary)
pub struct DisplaySource {
    screen: Screen,
}

impl DisplaySource {
    pub fn primary() -> RecordResult<Self> {
        let screens = Screen::all().map_err(|e| {
            RecordError::CaptureUnavailable(format!("failed to enumerate displays: {}", e))
        })?;

        log::info!(
            "Available displays: {:?}",
            screens
                .iter()
                .map(|s| (s.display_info.id, s.display_info.width, s.display_info.height))
                .collect::<Vec<_>>()
        );

        let screen = screens
            .iter()
            .find(|s| s.display_info.is_primary)
            .or_else(|| screens.first())
            .cloned()
            .ok_or_else(|| RecordError::CaptureUnavailable("no display found".into()))?;

        log::info!(
            "Recording display {} ({}x{}, scale {})",
            screen.display_info.id,
            screen.display_info.width,
            screen.display_info.height,
            screen.display_info.scale_factor
        );

        Ok(Self { screen })
    }
}

impl FrameSource for DisplaySource {
    fn capture(&self) -> RecordResult<Frame> {
        let image = self
            .screen
            .capture()
            .map_err(|e| RecordError::CaptureUnavailable(format!("screen capture failed: {}", e)))?;
        let (width, height) = (image.width(), image.height());
        Frame::new(width, height, PixelFormat::Rgba8, image.into_raw())
    }

    fn native_resolution(&self) -> RecordResult<Resolution> {
        let info = &self.screen.display_info;
        physical_size(info.width, info.height, info.scale_factor)
    }
}

/// Captures come back in physical pixels; display info reports logical size
fn physical_size(width: u32, height: u32, scale_factor: f32) -> RecordResult<Resolution> {
    let scale = if scale_factor.is_finite() && scale_factor > 0.0 {
        scale_factor as f64
    } else {
        1.0
    };
    let width = (width as f64 * scale).round() as u32;
    let height = (height as f64 * scale).round() as u32;
    if width == 0 || height == 0 {
        return Err(RecordError::CaptureUnavailable(format!(
            "display reports an empty size ({}x{})",
            width, height
        )));
    }
    Ok(Resolution::new(width, height))
}
