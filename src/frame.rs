//! Frame model.
//!
//! - `Frame`: immutable pixel buffer with its shape and capture time.
//!   Pixel storage is shared, so keeping a frame as the next diff baseline
//!   and handing it to evidence capture never copies pixels.
//!
//! Frames are produced by the ingestion layer and read-only afterwards.

use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use std::sync::Arc;

use crate::error::{FrameShape, MotionError, MotionResult};

/// Largest accepted frame edge. Anything bigger is a corrupt header, not a camera.
pub const MAX_FRAME_EDGE: u32 = 16_384;

/// Immutable captured frame.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    shape: FrameShape,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame from interleaved pixels (1 = gray, 3 = RGB, 4 = RGBA).
    ///
    /// Fails with `InvalidFrame` when the buffer length does not match the
    /// declared shape.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        captured_at: DateTime<Utc>,
    ) -> MotionResult<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(MotionError::invalid_frame(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        if width == 0 || height == 0 || width > MAX_FRAME_EDGE || height > MAX_FRAME_EDGE {
            return Err(MotionError::invalid_frame(format!(
                "frame dimensions out of range: {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(MotionError::invalid_frame(format!(
                "frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data: Arc::from(data),
            shape: FrameShape {
                width,
                height,
                channels,
            },
            captured_at,
        })
    }

    /// Convert a decoded image. Gray images stay single-channel, everything
    /// else is normalized to RGB.
    pub fn from_image(image: DynamicImage, captured_at: DateTime<Utc>) -> MotionResult<Self> {
        match image {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                Self::new(gray.into_raw(), width, height, 1, captured_at)
            }
            other => {
                let rgb = other.into_rgb8();
                let (width, height) = rgb.dimensions();
                Self::new(rgb.into_raw(), width, height, 3, captured_at)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn channels(&self) -> u8 {
        self.shape.channels
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Interleaved pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Image form for encoding. Alpha is dropped.
    pub fn to_image(&self) -> MotionResult<DynamicImage> {
        let (w, h) = (self.shape.width, self.shape.height);
        let pixels = self.data.to_vec();
        let image = match self.shape.channels {
            1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(w, h, pixels)
                .map(|rgba| DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).into_rgb8())),
            _ => None,
        };
        image.ok_or_else(|| MotionError::invalid_frame("pixel buffer does not fit frame shape"))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // No pixels.
        f.debug_struct("Frame")
            .field("shape", &self.shape)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// BT.601 luma of one interleaved pixel.
pub(crate) fn luma(pixel: &[u8]) -> u8 {
    match pixel {
        [r, g, b, ..] => {
            let y = 0.299_f32 * *r as f32 + 0.587_f32 * *g as f32 + 0.114_f32 * *b as f32;
            y.round().clamp(0.0, 255.0) as u8
        }
        [gray, ..] => *gray,
        [] => 0,
    }
}
