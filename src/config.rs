//! Recorder configuration

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .with_context(|| format!("Invalid resolution '{}', expected WIDTHxHEIGHT", s))?;
        let width = w.trim().parse().with_context(|| format!("Invalid width in '{}'", s))?;
        let height = h.trim().parse().with_context(|| format!("Invalid height in '{}'", s))?;
        Ok(Self { width, height })
    }
}

/// Video container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// AVI with Motion-JPEG frames, written natively
    #[default]
    Avi,
    Mp4,
    Mkv,
    Webm,
}

impl Container {
    /// Get file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Avi => "avi",
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
        }
    }

    /// Get GStreamer muxer element name
    pub fn muxer_element(&self) -> &'static str {
        match self {
            Container::Avi => "avimux",
            Container::Mp4 => "mp4mux",
            Container::Mkv => "matroskamux",
            Container::Webm => "webmmux",
        }
    }
}

/// Recording configuration passed to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Capture cadence in frames per second
    pub frame_rate: u32,
    /// Directory recordings are written to (created if absent)
    pub output_dir: PathBuf,
    /// Output size; None records at the display's native size
    pub resolution: Option<Resolution>,
    /// Consecutive failed captures after which the session stops itself
    pub failure_threshold: u32,
    /// Upper bound on a single capture before it counts as failed
    pub capture_timeout_ms: u64,
    /// JPEG quality for the AVI writer (1-100)
    pub jpeg_quality: u8,
    /// File name prefix, followed by the capture timestamp
    pub file_prefix: String,
    pub container: Container,
    /// Size at which the AVI writer continues in a new `_partN` file
    pub max_segment_mb: u32,
}

/// A RIFF file cannot describe 4 GiB or more
const MAX_SEGMENT_MB_LIMIT: u32 = 4096;

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Captures")
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_rate: 20,
            output_dir: default_output_dir(),
            resolution: None,
            failure_threshold: 10,
            capture_timeout_ms: 2000,
            jpeg_quality: 85,
            file_prefix: "screen_recording".to_string(),
            container: Container::Avi,
            max_segment_mb: 1024,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RecorderConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_rate == 0 {
            bail!("frameRate must be at least 1");
        }
        if self.failure_threshold == 0 {
            bail!("failureThreshold must be at least 1");
        }
        if self.capture_timeout_ms == 0 {
            bail!("captureTimeoutMs must be at least 1");
        }
        if let Some(res) = self.resolution {
            if res.width == 0 || res.height == 0 {
                bail!("resolution must be non-zero, got {}", res);
            }
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpegQuality must be within 1..=100, got {}", self.jpeg_quality);
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(['/', '\\']) {
            bail!("filePrefix must be a plain, non-empty file name");
        }
        if !(1..MAX_SEGMENT_MB_LIMIT).contains(&self.max_segment_mb) {
            bail!(
                "maxSegmentMb must be within 1..{}, got {}",
                MAX_SEGMENT_MB_LIMIT,
                self.max_segment_mb
            );
        }
        Ok(())
    }

    pub fn max_segment_bytes(&self) -> u64 {
        self.max_segment_mb as u64 * 1024 * 1024
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.frame_rate, 20);
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.container, Container::Avi);
        assert!(config.output_dir.ends_with("Captures"));
        assert_eq!(config.capture_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_segment_bytes(), 1 << 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"frameRate": 30, "outputDir": "/tmp/recordings", "resolution": {"width": 640, "height": 480}}"#,
        )
        .unwrap();

        let config = RecorderConfig::load(&path).unwrap();
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/recordings"));
        assert_eq!(config.resolution, Some(Resolution::new(640, 480)));
        assert_eq!(config.jpeg_quality, 85);
    }

    #[test]
    fn test_validate_rejects_zero_frame_rate() {
        let config = RecorderConfig {
            frame_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capture_timeout() {
        let config = RecorderConfig {
            capture_timeout_ms: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("captureTimeoutMs"));
    }

    #[test]
    fn test_validate_bounds_segment_size() {
        for max_segment_mb in [0, 4096] {
            let config = RecorderConfig {
                max_segment_mb,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{} accepted", max_segment_mb);
        }
        let config = RecorderConfig {
            max_segment_mb: 4095,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let config = RecorderConfig {
            file_prefix: "../escape".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1920x1080".parse::<Resolution>().unwrap(), Resolution::new(1920, 1080));
        assert!("1920".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(Container::Avi.extension(), "avi");
        assert_eq!(Container::Mp4.muxer_element(), "mp4mux");
    }
}
