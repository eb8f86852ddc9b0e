//! Captured frame type and pixel layout conversion

use image::{ImageBuffer, Rgb, imageops};

use crate::error::{RecordError, RecordResult};

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B
    Rgb8,
    /// Packed 8-bit R, G, B, A
    Rgba8,
    /// Packed 8-bit B, G, R, A (typical X11/Windows framebuffer order)
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    /// Read one pixel as (r, g, b, a)
    fn read(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
        }
    }

    fn write(self, [r, g, b, a]: [u8; 4], out: &mut Vec<u8>) {
        match self {
            PixelFormat::Rgb8 => out.extend_from_slice(&[r, g, b]),
            PixelFormat::Rgba8 => out.extend_from_slice(&[r, g, b, a]),
            PixelFormat::Bgra8 => out.extend_from_slice(&[b, g, r, a]),
        }
    }
}

/// One captured still image
///
/// The buffer is always exactly `width * height * bytes_per_pixel` long,
/// rows top to bottom with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> RecordResult<Self> {
        if width == 0 || height == 0 {
            return Err(RecordError::Encode(format!(
                "frame has zero dimension: {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(RecordError::Encode(format!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                format
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Convert to another pixel layout, consuming the frame
    pub fn into_format(self, target: PixelFormat) -> Frame {
        if self.format == target {
            return self;
        }

        let src = self.format;
        let mut out =
            Vec::with_capacity(self.width as usize * self.height as usize * target.bytes_per_pixel());
        for px in self.data.chunks_exact(src.bytes_per_pixel()) {
            target.write(src.read(px), &mut out);
        }

        Frame {
            width: self.width,
            height: self.height,
            format: target,
            data: out,
        }
    }

    /// Scale to the given size; the result is always `Rgb8`
    pub fn resized(self, width: u32, height: u32) -> RecordResult<Frame> {
        if self.width == width && self.height == height {
            return Ok(self);
        }

        let (src_w, src_h) = (self.width, self.height);
        let rgb = self.into_format(PixelFormat::Rgb8);
        let img = ImageBuffer::<Rgb<u8>, _>::from_raw(src_w, src_h, rgb.data)
            .ok_or_else(|| RecordError::Encode("frame buffer does not match its size".into()))?;
        let scaled = imageops::resize(&img, width, height, imageops::FilterType::Triangle);

        Frame::new(width, height, PixelFormat::Rgb8, scaled.into_raw())
    }
}
