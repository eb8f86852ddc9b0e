//! Screen capture to video recording
//!
//! Captures the display at a fixed cadence on a background thread and
//! writes the frames into a video file, with a start/stop lifecycle that
//! always leaves a complete file behind.

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod screencast;

pub use config::{Container, RecorderConfig, Resolution};
pub use error::{ErrorKind, RecordError, RecordResult};
pub use frame::{Frame, PixelFormat};
pub use screencast::{RecordingSession, SessionState, StartOutcome, StopOutcome};
