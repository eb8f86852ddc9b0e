//! Screen recording
//!
//! A [`RecordingSession`] captures frames from a [`crate::capture::FrameSource`]
//! on a background thread, paces them to the configured frame rate and
//! streams them into a [`VideoSink`]. The default sink writes AVI/MJPEG;
//! with the `gstreamer` feature mp4, mkv and webm go through a GStreamer
//! pipeline using the best available encoder.

pub mod avi;
pub mod clock;
#[cfg(feature = "gstreamer")]
pub mod encoder;
#[cfg(feature = "gstreamer")]
mod pipeline;
mod recorder;
pub mod sink;
mod state;
mod target;

pub use clock::{Clock, ManualClock, StopSignal, SystemClock};
#[cfg(feature = "gstreamer")]
pub use pipeline::GstSink;
pub use recorder::RecordingSession;
pub use sink::{DefaultSinkFactory, SinkFactory, VideoSink};
pub use state::{
    RecordingStatus, RecordingSummary, SessionOutcome, SessionState, StartOutcome, StopOutcome,
};
pub use target::RecordingTarget;
