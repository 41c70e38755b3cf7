use chrono::Utc;
use std::path::{Path, PathBuf};

use super::{FrameSource, ReadOutcome, SourceConfig, SourceStats, SourceStatus};
use crate::error::{MotionError, MotionResult};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Plays back a directory of still images in file-name order.
///
/// The directory listing is taken on `connect`. A missing directory makes
/// the source unavailable; an unreadable file is a read failure and is
/// skipped on the next read.
pub struct SequenceSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next_index: usize,
    listed: bool,
    frames_captured: u64,
    read_failures: u64,
}

impl SequenceSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            root: PathBuf::from(config.url.trim()),
            files: Vec::new(),
            next_index: 0,
            listed: false,
            frames_captured: 0,
            read_failures: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.next_index)
    }

    fn list(&mut self) -> MotionResult<()> {
        self.files = list_images(&self.root)?;
        self.next_index = 0;
        self.listed = true;
        log::info!(
            "SequenceSource: {} images in {}",
            self.files.len(),
            self.root.display()
        );
        Ok(())
    }
}

impl FrameSource for SequenceSource {
    fn describe(&self) -> String {
        format!("{} (image sequence)", self.root.display())
    }

    fn connect(&mut self) -> MotionResult<()> {
        self.list()
    }

    fn poll(&mut self) -> SourceStatus {
        if !self.root.is_dir() {
            return SourceStatus::Unavailable;
        }
        if !self.listed && self.list().is_err() {
            return SourceStatus::Unavailable;
        }
        SourceStatus::Available
    }

    fn read(&mut self) -> MotionResult<ReadOutcome> {
        if !self.listed {
            self.list()?;
        }
        let Some(path) = self.files.get(self.next_index).cloned() else {
            return Ok(ReadOutcome::EndOfStream);
        };
        self.next_index += 1;

        let image = image::open(&path).map_err(|e| {
            self.read_failures += 1;
            MotionError::source_unavailable(format!("decode {}: {}", path.display(), e))
        })?;
        let frame = Frame::from_image(image, Utc::now())?;
        self.frames_captured += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            read_failures: self.read_failures,
            source: self.root.display().to_string(),
        }
    }
}

fn list_images(root: &Path) -> MotionResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root).map_err(|e| {
        MotionError::source_unavailable(format!("read dir {}: {}", root.display(), e))
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
