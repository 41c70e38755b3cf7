use chrono::Utc;

use super::{FrameSource, ReadOutcome, SourceConfig, SourceStats, SourceStatus};
use crate::error::MotionResult;
use crate::frame::Frame;

const BACKGROUND: u8 = 128;
const BLOCK: u8 = 255;
/// Frames between scene changes.
const SCENE_PERIOD: u64 = 50;

/// Synthetic scene for `stub://` URLs.
///
/// A uniform gray background with a bright square that jumps to a new
/// position every `SCENE_PERIOD` frames. Static frames diff to nothing;
/// each jump produces one burst of motion.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    scene_state: u32,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count > 0 && self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let side = (width.min(height) / 4).max(1);
        let span_x = (width - side).max(1);
        let span_y = (height - side).max(1);
        let origin_x = (self.scene_state as usize * 120) % span_x;
        let origin_y = (self.scene_state as usize * 80) % span_y;

        let mut pixels = vec![BACKGROUND; width * height * 3];
        for y in origin_y..(origin_y + side).min(height) {
            let row = y * width * 3;
            for x in origin_x..(origin_x + side).min(width) {
                let offset = row + x * 3;
                pixels[offset..offset + 3].fill(BLOCK);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.url)
    }

    fn connect(&mut self) -> MotionResult<()> {
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn poll(&mut self) -> SourceStatus {
        SourceStatus::Available
    }

    fn read(&mut self) -> MotionResult<ReadOutcome> {
        if self
            .config
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(ReadOutcome::EndOfStream);
        }
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            3,
            Utc::now(),
        )?;
        Ok(ReadOutcome::Frame(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: 0,
            source: self.config.url.clone(),
        }
    }
}
