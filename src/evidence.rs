//! Evidence capture: persists the frame that triggered an alert.
//!
//! Artifacts are JPEG files named `<prefix><YYYYmmdd_HHMMSS>.jpg` from the
//! frame's capture time (UTC, one-second resolution). Writes go through a
//! temp file and a rename so a reader never sees a half-written image.
//! Each triggering blob is outlined in green on the saved image.

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::detect::Blob;
use crate::error::{MotionError, MotionResult};
use crate::frame::Frame;

pub const DEFAULT_EVIDENCE_DIR: &str = "evidence";
pub const DEFAULT_EVIDENCE_PREFIX: &str = "motion_";
const EVIDENCE_EXTENSION: &str = "jpg";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MARK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MARK_THICKNESS: u32 = 2;

/// Reference to a persisted evidence image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    /// Hex SHA-256 of the encoded file.
    pub sha256: String,
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (sha256={})", self.path.display(), self.sha256)
    }
}

pub trait EvidenceStore: Send + Sync {
    /// Persist `frame` with each of `marks` outlined.
    fn capture(&self, frame: &Frame, marks: &[Blob]) -> MotionResult<ArtifactRef>;
}

#[derive(Clone, Debug)]
pub struct EvidenceConfig {
    pub dir: PathBuf,
    pub prefix: String,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_EVIDENCE_DIR),
            prefix: DEFAULT_EVIDENCE_PREFIX.to_string(),
        }
    }
}

pub struct FilesystemEvidenceStore {
    root: PathBuf,
    prefix: String,
    // Serializes name selection so concurrent captures in one second don't collide.
    naming: Mutex<()>,
}

impl FilesystemEvidenceStore {
    pub fn new(cfg: EvidenceConfig) -> MotionResult<Self> {
        let prefix = sanitize_prefix(&cfg.prefix)?;
        fs::create_dir_all(&cfg.dir).map_err(|e| {
            MotionError::capture_io(format!(
                "failed to create evidence dir {}: {}",
                cfg.dir.display(),
                e
            ))
        })?;
        Ok(Self {
            root: cfg.dir,
            prefix,
            naming: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, stamp: &str, attempt: u32) -> PathBuf {
        let name = if attempt == 0 {
            format!("{}{}.{}", self.prefix, stamp, EVIDENCE_EXTENSION)
        } else {
            format!("{}{}_{}.{}", self.prefix, stamp, attempt, EVIDENCE_EXTENSION)
        };
        self.root.join(name)
    }
}

impl EvidenceStore for FilesystemEvidenceStore {
    fn capture(&self, frame: &Frame, marks: &[Blob]) -> MotionResult<ArtifactRef> {
        let mut image = frame.to_image()?.into_rgb8();
        annotate(&mut image, marks);
        let encoded = encode_jpeg(image)?;
        let sha256 = hex::encode(Sha256::digest(&encoded));
        let stamp = frame.captured_at().format(TIMESTAMP_FORMAT).to_string();

        let _guard = self.naming.lock().unwrap_or_else(|e| e.into_inner());
        let mut attempt = 0;
        let mut path = self.artifact_path(&stamp, attempt);
        while path.exists() {
            attempt += 1;
            path = self.artifact_path(&stamp, attempt);
        }
        write_atomic(&path, &encoded).map_err(|e| {
            MotionError::capture_io(format!("failed to write {}: {}", path.display(), e))
        })?;
        log::info!("captured evidence frame {}", path.display());
        Ok(ArtifactRef { path, sha256 })
    }
}

/// Draw a hollow rectangle, `MARK_THICKNESS` pixels wide inward, around each blob.
fn annotate(image: &mut RgbImage, marks: &[Blob]) {
    for blob in marks {
        for inset in 0..MARK_THICKNESS {
            let (Some(width), Some(height)) = (
                blob.width.checked_sub(2 * inset),
                blob.height.checked_sub(2 * inset),
            ) else {
                break;
            };
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at((blob.x + inset) as i32, (blob.y + inset) as i32)
                .of_size(width, height);
            draw_hollow_rect_mut(image, rect, MARK_COLOR);
        }
    }
}

fn encode_jpeg(image: RgbImage) -> MotionResult<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|e| MotionError::capture_io(format!("jpeg encode failed: {}", e)))?;
    Ok(buf)
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("jpg.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}

fn sanitize_prefix(prefix: &str) -> MotionResult<String> {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        return Err(MotionError::capture_io("evidence prefix cannot be empty"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(MotionError::capture_io(
            "evidence prefix must be [A-Za-z0-9_-] only",
        ));
    }
    Ok(trimmed.to_string())
}
