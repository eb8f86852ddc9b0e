//! Output path and encoding parameters for one recording

use chrono::{DateTime, Local};
use std::path::PathBuf;

use crate::config::{Container, RecorderConfig, Resolution};
use crate::error::{RecordError, RecordResult};

/// Where a session writes and how the stream is encoded
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingTarget {
    pub path: PathBuf,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub container: Container,
    pub jpeg_quality: u8,
    /// File size at which an AVI recording continues in a new part
    pub max_segment_bytes: u64,
}

impl RecordingTarget {
    /// Build a target under the configured directory, named after `started_at`
    ///
    /// Creates the output directory if needed. When a file with the same
    /// timestamp already exists a numeric suffix is appended, so an existing
    /// recording is never reused.
    pub fn resolve(
        config: &RecorderConfig,
        resolution: Resolution,
        started_at: DateTime<Local>,
    ) -> RecordResult<Self> {
        std::fs::create_dir_all(&config.output_dir)
            .map_err(|e| RecordError::io(&config.output_dir, e))?;

        let stamp = started_at.format("%Y-%m-%d_%H-%M-%S");
        let ext = config.container.extension();
        let mut path = config
            .output_dir
            .join(format!("{}_{}.{}", config.file_prefix, stamp, ext));
        let mut suffix = 1;
        while path.exists() {
            path = config
                .output_dir
                .join(format!("{}_{}_{}.{}", config.file_prefix, stamp, suffix, ext));
            suffix += 1;
        }

        Ok(Self {
            path,
            resolution,
            frame_rate: config.frame_rate,
            container: config.container,
            jpeg_quality: config.jpeg_quality,
            max_segment_bytes: config.max_segment_bytes(),
        })
    }
}
