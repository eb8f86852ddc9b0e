//! Hardware encoder detection and selection
//!
//! Queries GStreamer for available encoders and prioritizes hardware-accelerated ones

use gstreamer as gst;

use crate::config::Container;
use crate::error::{RecordError, RecordResult};

/// Codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    VP9,
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::VP9 => "VP9",
        }
    }

    /// Whether the container's muxer accepts this codec
    pub fn fits(&self, container: Container) -> bool {
        match container {
            Container::Webm => *self == Codec::VP9,
            Container::Mp4 | Container::Avi => matches!(self, Codec::H264 | Codec::H265),
            Container::Mkv => true,
        }
    }
}

/// Information about an available encoder
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    /// Human-readable name (e.g., "VA-API H.264")
    pub name: String,
    /// GStreamer element name (e.g., "vaapih264enc")
    pub gst_element: String,
    pub codec: Codec,
    pub hardware: bool,
    /// Lower is preferred; hardware encoders sort first
    pub priority: u8,
}

impl EncoderInfo {
    /// Display name with hardware/software indicator
    pub fn display_name(&self) -> String {
        let hw_indicator = if self.hardware {
            " (Hardware)"
        } else {
            " (Software)"
        };
        format!("{}{}", self.name, hw_indicator)
    }
}

const KNOWN_ENCODERS: &[(&str, &str, Codec, bool, u8)] = &[
    ("VA-API H.264", "vaapih264enc", Codec::H264, true, 10),
    ("VA-API H.265", "vaapih265enc", Codec::H265, true, 11),
    ("VA-API VP9", "vaapivp9enc", Codec::VP9, true, 12),
    ("NVENC H.264", "nvh264enc", Codec::H264, true, 20),
    ("NVENC H.265", "nvh265enc", Codec::H265, true, 21),
    ("x264 H.264", "x264enc", Codec::H264, false, 100),
    ("VP9", "vp9enc", Codec::VP9, false, 101),
];

/// Detect available video encoders, best first
pub fn detect_encoders() -> RecordResult<Vec<EncoderInfo>> {
    gst::init().map_err(|e| RecordError::Encode(format!("Failed to initialize GStreamer: {}", e)))?;

    let mut encoders: Vec<EncoderInfo> = KNOWN_ENCODERS
        .iter()
        .filter(|(_, element, ..)| encoder_available(element))
        .map(|&(name, element, codec, hardware, priority)| EncoderInfo {
            name: name.to_string(),
            gst_element: element.to_string(),
            codec,
            hardware,
            priority,
        })
        .collect();

    encoders.sort_by_key(|e| e.priority);
    Ok(encoders)
}

/// Check if a GStreamer encoder element is available
fn encoder_available(element_name: &str) -> bool {
    gst::ElementFactory::find(element_name).is_some()
}

/// Pick the encoder for a container: the named one, or the best that fits
pub fn select_encoder(container: Container, requested: Option<&str>) -> RecordResult<EncoderInfo> {
    let encoders = detect_encoders()?;

    log::info!(
        "Available encoders: {:?}",
        encoders.iter().map(|e| &e.gst_element).collect::<Vec<_>>()
    );

    let found = match requested {
        Some(element) => encoders.into_iter().find(|e| e.gst_element == element),
        None => encoders.into_iter().find(|e| e.codec.fits(container)),
    };

    found.ok_or_else(|| {
        RecordError::Encode(format!(
            "No usable encoder for {} output{}. Install GStreamer plugins for this encoder.",
            container.extension(),
            requested.map(|r| format!(" (requested '{}')", r)).unwrap_or_default()
        ))
    })
}
