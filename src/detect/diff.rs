//! Frame differencing into a binary foreground mask.
//!
//! absdiff -> luma -> gaussian smoothing -> binary threshold -> dilation.
//! The detector holds no state between calls; identical inputs produce
//! identical masks.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{MotionError, MotionResult};
use crate::frame::{luma, Frame};

pub const DEFAULT_BLUR_KERNEL: u32 = 5;
pub const DEFAULT_THRESHOLD: u8 = 20;
pub const DEFAULT_DILATE_KERNEL: u32 = 3;
pub const DEFAULT_DILATE_ITERATIONS: u32 = 3;

/// Mask value for foreground pixels.
pub const FOREGROUND: u8 = 255;

/// Tuning for the differencing stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Smoothing kernel edge length (odd).
    pub blur_kernel: u32,
    /// Gaussian sigma. Zero or negative derives it from the kernel size.
    pub blur_sigma: f64,
    /// Smoothed intensities strictly above this become foreground.
    pub threshold: u8,
    /// Dilation structuring element edge length (odd).
    pub dilate_kernel: u32,
    pub dilate_iterations: u32,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            blur_kernel: DEFAULT_BLUR_KERNEL,
            blur_sigma: 0.0,
            threshold: DEFAULT_THRESHOLD,
            dilate_kernel: DEFAULT_DILATE_KERNEL,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
        }
    }
}

/// Single-channel binary mask, 0 or 255 per pixel, same size as the frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffMask {
    image: GrayImage,
}

impl DiffMask {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] == FOREGROUND
    }

    /// Row-major mask bytes.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn foreground_pixels(&self) -> u64 {
        self.image
            .as_raw()
            .iter()
            .filter(|&&v| v == FOREGROUND)
            .count() as u64
    }

    /// Mask as a grayscale image, e.g. for dumping while tuning thresholds.
    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiffDetector {
    config: DiffConfig,
}

impl DiffDetector {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compute the foreground mask for a frame pair.
    pub fn compute_mask(&self, prev: &Frame, curr: &Frame) -> MotionResult<DiffMask> {
        if prev.shape() != curr.shape() {
            return Err(MotionError::DimensionMismatch {
                previous: prev.shape(),
                current: curr.shape(),
            });
        }
        let width = curr.width() as usize;
        let height = curr.height() as usize;

        let gray = abs_diff_luma(prev, curr);
        let smoothed = gaussian_blur(
            &gray,
            width,
            height,
            self.config.blur_kernel,
            self.config.blur_sigma,
        );
        let threshold = self.config.threshold;
        let mut mask: Vec<u8> = smoothed
            .into_iter()
            .map(|v| if v > threshold { FOREGROUND } else { 0 })
            .collect();
        for _ in 0..self.config.dilate_iterations {
            mask = dilate(&mask, width, height, self.config.dilate_kernel);
        }

        let image = GrayImage::from_raw(curr.width(), curr.height(), mask)
            .ok_or_else(|| MotionError::invalid_frame("mask buffer does not fit frame shape"))?;
        Ok(DiffMask { image })
    }
}

impl DiffMask {
    /// Build a mask directly from 0/255 bytes. Any non-zero byte is foreground.
    pub fn from_raw(width: u32, height: u32, raw: Vec<u8>) -> MotionResult<Self> {
        let normalized = raw
            .into_iter()
            .map(|v| if v == 0 { 0 } else { FOREGROUND })
            .collect();
        let image = GrayImage::from_raw(width, height, normalized)
            .ok_or_else(|| MotionError::invalid_frame("mask buffer does not fit mask shape"))?;
        Ok(Self { image })
    }

    /// All-background mask.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([0])),
        }
    }
}

fn abs_diff_luma(prev: &Frame, curr: &Frame) -> Vec<u8> {
    let channels = curr.channels() as usize;
    let mut diff = [0u8; 4];
    prev.pixels()
        .chunks_exact(channels)
        .zip(curr.pixels().chunks_exact(channels))
        .map(|(a, b)| {
            for (slot, (x, y)) in diff.iter_mut().zip(a.iter().zip(b.iter())) {
                *slot = x.abs_diff(*y);
            }
            luma(&diff[..channels])
        })
        .collect()
}

/// Separable gaussian smoothing with reflect-101 borders.
fn gaussian_blur(src: &[u8], width: usize, height: usize, ksize: u32, sigma: f64) -> Vec<u8> {
    let kernel = gaussian_kernel(ksize, sigma);
    if kernel.len() <= 1 {
        return src.to_vec();
    }
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = vec![0f32; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - radius, width);
                acc += weight * row[sx] as f32;
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0u8; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - radius, height);
                acc += weight * horizontal[sy * width + x];
            }
            out[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// 1-D gaussian weights summing to one.
///
/// Small kernels with a derived sigma use the fixed binomial tables, so a 5-tap
/// kernel is exactly `[1 4 6 4 1] / 16`.
fn gaussian_kernel(ksize: u32, sigma: f64) -> Vec<f32> {
    let ksize = ksize.max(1) as usize;
    if sigma <= 0.0 {
        match ksize {
            1 => return vec![1.0],
            3 => return vec![0.25, 0.5, 0.25],
            5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
            7 => {
                return vec![
                    0.031_25, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.031_25,
                ]
            }
            _ => {}
        }
    }
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (ksize / 2) as f64;
    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - radius;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Mirror an out-of-range index without repeating the edge sample.
fn reflect_101(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

/// One dilation pass with a square element. Out-of-frame neighbours are ignored.
fn dilate(src: &[u8], width: usize, height: usize, ksize: u32) -> Vec<u8> {
    let radius = (ksize.max(1) / 2) as usize;
    if radius == 0 {
        return src.to_vec();
    }

    let mut horizontal = vec![0u8; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            horizontal[y * width + x] = row[lo..=hi].iter().copied().max().unwrap_or(0);
        }
    }

    let mut out = vec![0u8; src.len()];
    for y in 0..height {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        for x in 0..width {
            out[y * width + x] = (lo..=hi)
                .map(|sy| horizontal[sy * width + x])
                .max()
                .unwrap_or(0);
        }
    }
    out
}
