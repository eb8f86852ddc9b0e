//! Error types for the recording pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by frame sources, video sinks and the recording session
#[derive(Error, Debug)]
pub enum RecordError {
    /// The display could not be read (no session, permission denied, timeout)
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The output path or directory could not be created or written
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The encoder rejected a frame or could not be initialized
    #[error("encode error: {0}")]
    Encode(String),
}

impl RecordError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Copyable classification used in status reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::CaptureUnavailable(_) => ErrorKind::CaptureUnavailable,
            RecordError::Io { .. } => ErrorKind::Io,
            RecordError::Encode(_) => ErrorKind::Encode,
        }
    }
}

/// Error classification without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    CaptureUnavailable,
    Io,
    Encode,
}

pub type RecordResult<T> = Result<T, RecordError>;
