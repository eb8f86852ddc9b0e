//! Session state machine and status reporting

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorKind;

/// Lifecycle state of a recording session
///
/// `Idle -> Recording` on start, `Recording -> Stopping -> Idle` on stop
/// or when the capture loop gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Stopping,
}

/// How the most recent session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "error")]
pub enum SessionOutcome {
    Completed,
    Failed(ErrorKind),
}

/// Result of one finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    pub output_path: PathBuf,
    /// Every file of the recording; more than one when it was split
    pub files: Vec<PathBuf>,
    pub frames_written: u64,
    /// Captures skipped because the display could not be read
    pub frames_skipped: u64,
    pub duration: Duration,
    pub outcome: SessionOutcome,
    /// Message of the error that ended the session, if any
    pub error: Option<String>,
}

/// Snapshot returned by `RecordingSession::status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: SessionState,
    /// File being written, or the last finished file once idle
    pub output_path: Option<PathBuf>,
    pub frames_written: u64,
    /// How the most recent session ended, None before the first one
    pub last_outcome: Option<SessionOutcome>,
    pub last_summary: Option<RecordingSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started(PathBuf),
    /// A session is already recording or stopping; nothing was started
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(RecordingSummary),
    /// No session was recording
    AlreadyIdle,
}
