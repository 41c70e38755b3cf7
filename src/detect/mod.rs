//! Motion detection pipeline: frame pair -> diff mask -> blobs.
//!
//! Both stages are pure and synchronous; they run on the loop thread.

mod blob;
mod diff;

pub use blob::{Blob, BlobExtractor, MotionReport, DEFAULT_AREA_THRESHOLD};
pub use diff::{
    DiffConfig, DiffDetector, DiffMask, DEFAULT_BLUR_KERNEL, DEFAULT_DILATE_ITERATIONS,
    DEFAULT_DILATE_KERNEL, DEFAULT_THRESHOLD, FOREGROUND,
};

use serde::{Deserialize, Serialize};

use crate::error::MotionResult;
use crate::frame::Frame;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub diff: DiffConfig,
    pub area_threshold: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            diff: DiffConfig::default(),
            area_threshold: DEFAULT_AREA_THRESHOLD,
        }
    }
}

/// DiffDetector followed by BlobExtractor.
#[derive(Clone, Debug, Default)]
pub struct MotionPipeline {
    diff: DiffDetector,
    blobs: BlobExtractor,
}

impl MotionPipeline {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            diff: DiffDetector::new(config.diff),
            blobs: BlobExtractor::new(config.area_threshold),
        }
    }

    pub fn detect(&self, prev: &Frame, curr: &Frame) -> MotionResult<MotionReport> {
        let mask = self.diff.compute_mask(prev, curr)?;
        Ok(self.blobs.extract(&mask))
    }

    pub fn diff_detector(&self) -> &DiffDetector {
        &self.diff
    }

    pub fn blob_extractor(&self) -> &BlobExtractor {
        &self.blobs
    }
}
