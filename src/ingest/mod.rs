//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - `stub://<name>`: synthetic scene (testing, demos)
//! - local directory: image sequence played back in file-name order
//! - `http(s)://`: JPEG snapshot endpoint (ESP32-CAM style)
//!
//! Every source exposes the same poll/read contract. `poll` says whether a
//! read is worth attempting; `read` either yields a frame, reports
//! end-of-stream, or fails with `SourceUnavailable`. Blocking reads are
//! bounded by timeouts so a stop request is honoured promptly.

mod sequence;
mod snapshot;
mod synthetic;

pub use sequence::SequenceSource;
pub use snapshot::SnapshotSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::error::MotionResult;
use crate::frame::Frame;

pub const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
pub const DEFAULT_TARGET_FPS: u32 = 10;
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceStatus {
    Available,
    Unavailable,
}

#[derive(Clone, Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub source: String,
}

pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    fn connect(&mut self) -> MotionResult<()> {
        Ok(())
    }

    fn poll(&mut self) -> SourceStatus;

    fn read(&mut self) -> MotionResult<ReadOutcome>;

    fn stats(&self) -> SourceStats;
}

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name`, a local directory, or an `http(s)://` snapshot URL.
    pub url: String,
    /// Target frame rate (frames per second). The loop paces reads to this.
    pub target_fps: u32,
    /// Frame width (synthetic source only).
    pub width: u32,
    /// Frame height (synthetic source only).
    pub height: u32,
    /// Stop after this many frames (synthetic source only).
    pub max_frames: Option<u64>,
    /// Per-request timeout for network sources.
    pub read_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            max_frames: None,
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl SourceConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }
}

/// Source selected from configuration by URL shape.
pub struct ConfiguredSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Sequence(SequenceSource),
    Snapshot(SnapshotSource),
}

impl ConfiguredSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("source url cannot be empty"));
        }
        let backend = if url.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(config))
        } else if url.starts_with("http://") || url.starts_with("https://") {
            SourceBackend::Snapshot(SnapshotSource::new(config)?)
        } else if url.contains("://") {
            return Err(anyhow!("unsupported source url scheme: {}", url));
        } else {
            SourceBackend::Sequence(SequenceSource::new(config))
        };
        Ok(Self { backend })
    }
}

impl FrameSource for ConfiguredSource {
    fn describe(&self) -> String {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.describe(),
            SourceBackend::Sequence(source) => source.describe(),
            SourceBackend::Snapshot(source) => source.describe(),
        }
    }

    fn connect(&mut self) -> MotionResult<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::Sequence(source) => source.connect(),
            SourceBackend::Snapshot(source) => source.connect(),
        }
    }

    fn poll(&mut self) -> SourceStatus {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.poll(),
            SourceBackend::Sequence(source) => source.poll(),
            SourceBackend::Snapshot(source) => source.poll(),
        }
    }

    fn read(&mut self) -> MotionResult<ReadOutcome> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.read(),
            SourceBackend::Sequence(source) => source.read(),
            SourceBackend::Snapshot(source) => source.read(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::Sequence(source) => source.stats(),
            SourceBackend::Snapshot(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_backend_by_url() {
        let stub = ConfiguredSource::new(SourceConfig::default()).unwrap();
        assert!(stub.describe().contains("synthetic"));

        let dir = ConfiguredSource::new(SourceConfig {
            url: "/var/lib/motion/frames".into(),
            ..SourceConfig::default()
        })
        .unwrap();
        assert!(dir.describe().contains("/var/lib/motion/frames"));

        assert!(ConfiguredSource::new(SourceConfig {
            url: "rtsp://camera/stream".into(),
            ..SourceConfig::default()
        })
        .is_err());
        assert!(ConfiguredSource::new(SourceConfig {
            url: "  ".into(),
            ..SourceConfig::default()
        })
        .is_err());
    }

    #[test]
    fn frame_interval_follows_fps() {
        let config = SourceConfig {
            target_fps: 4,
            ..SourceConfig::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(250));
    }
}
