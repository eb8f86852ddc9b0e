//! Video sink contract

use std::path::{Path, PathBuf};

use super::avi::AviWriter;
use super::target::RecordingTarget;
use crate::config::Container;
use crate::error::{RecordError, RecordResult};
use crate::frame::{Frame, PixelFormat};

/// An open output file accepting frames in capture order
///
/// A handle only exists after a successful open, so `close` can never run
/// against an unopened sink. `close` is idempotent.
pub trait VideoSink: Send {
    /// Pixel layout `append` expects
    fn input_format(&self) -> PixelFormat;

    /// Encode one frame, advancing the stream by one frame period
    fn append(&mut self, frame: Frame) -> RecordResult<()>;

    /// Flush, write the container trailer and release the encoder
    fn close(&mut self) -> RecordResult<()>;

    fn frames_written(&self) -> u64;

    /// First file of the recording
    fn path(&self) -> &Path;

    /// Every file written so far, in playback order
    fn files(&self) -> Vec<PathBuf> {
        vec![self.path().to_path_buf()]
    }
}

/// Opens sinks for recording targets
pub trait SinkFactory: Send + Sync {
    fn open(&self, target: &RecordingTarget) -> RecordResult<Box<dyn VideoSink>>;
}

/// Picks the sink implementation from the target's container
#[derive(Debug, Default, Clone)]
pub struct DefaultSinkFactory {
    /// GStreamer encoder element override (None = best available)
    pub encoder: Option<String>,
}

impl SinkFactory for DefaultSinkFactory {
    fn open(&self, target: &RecordingTarget) -> RecordResult<Box<dyn VideoSink>> {
        match target.container {
            Container::Avi => Ok(Box::new(AviWriter::create(target)?)),
            #[cfg(feature = "gstreamer")]
            Container::Mp4 | Container::Mkv | Container::Webm => Ok(Box::new(
                super::pipeline::GstSink::open(target, self.encoder.as_deref())?,
            )),
            #[cfg(not(feature = "gstreamer"))]
            other => Err(RecordError::io(
                &target.path,
                std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!(
                        "{} output needs the `gstreamer` feature",
                        other.extension()
                    ),
                ),
            )),
        }
    }
}

/// Check a frame against the size and layout declared at open
pub(crate) fn check_frame(target: &RecordingTarget, format: PixelFormat, frame: &Frame) -> RecordResult<()> {
    if frame.width() != target.resolution.width || frame.height() != target.resolution.height {
        return Err(RecordError::Encode(format!(
            "frame is {}x{}, stream was opened for {}",
            frame.width(),
            frame.height(),
            target.resolution
        )));
    }
    if frame.format() != format {
        return Err(RecordError::Encode(format!(
            "frame is {:?}, stream expects {:?}",
            frame.format(),
            format
        )));
    }
    Ok(())
}
