use anyhow::{anyhow, Result};
use chrono::Utc;
use std::io::Read;

use super::{FrameSource, ReadOutcome, SourceConfig, SourceStats, SourceStatus};
use crate::error::{MotionError, MotionResult};
use crate::frame::Frame;

/// Upper bound on a single snapshot body.
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

/// Polls a JPEG snapshot endpoint (ESP32-CAM `/capture` style).
///
/// Each read is one bounded HTTP GET. A failed request is a read failure;
/// the source itself never reports end-of-stream.
pub struct SnapshotSource {
    url: String,
    agent: ureq::Agent,
    frames_captured: u64,
    read_failures: u64,
}

impl SnapshotSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = config.url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("snapshot source requires an http(s) url"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(config.read_timeout)
            .build();
        Ok(Self {
            url,
            agent,
            frames_captured: 0,
            read_failures: 0,
        })
    }

    fn fetch(&self) -> MotionResult<Vec<u8>> {
        let response = self.agent.get(&self.url).call().map_err(|e| {
            MotionError::source_unavailable(format!("fetch snapshot from {}: {}", self.url, e))
        })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| MotionError::source_unavailable(format!("read snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(MotionError::source_unavailable("empty snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for SnapshotSource {
    fn describe(&self) -> String {
        format!("{} (http snapshot)", self.url)
    }

    fn connect(&mut self) -> MotionResult<()> {
        log::info!("SnapshotSource: polling {}", self.url);
        Ok(())
    }

    fn poll(&mut self) -> SourceStatus {
        SourceStatus::Available
    }

    fn read(&mut self) -> MotionResult<ReadOutcome> {
        let decoded = self.fetch().and_then(|bytes| {
            image::load_from_memory(&bytes)
                .map_err(|e| MotionError::source_unavailable(format!("decode jpeg: {}", e)))
        });
        let image = match decoded {
            Ok(image) => image,
            Err(e) => {
                self.read_failures += 1;
                return Err(e);
            }
        };
        let frame = Frame::from_image(image, Utc::now())?;
        self.frames_captured += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            read_failures: self.read_failures,
            source: self.url.clone(),
        }
    }
}
