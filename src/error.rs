//! Error taxonomy for the detection pipeline and its collaborators.
//!
//! None of these variants terminate the run loop. Each one is scoped to the
//! frame pair or side effect that produced it:
//!
//! - `DimensionMismatch` / `InvalidFrame`: that frame pair is skipped.
//! - `SourceUnavailable`: drives the source-lost sub-state.
//! - `CaptureIo`: the alert goes out without an attachment.
//! - `Delivery`: the alert still counts as raised for cooldown purposes.
//! - `LogIo`: reported to the operator, detection continues.

use std::fmt;

/// Width, height and channel count of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("frame dimensions differ: previous {previous}, current {current}")]
    DimensionMismatch {
        previous: FrameShape,
        current: FrameShape,
    },

    #[error("invalid frame: {message}")]
    InvalidFrame { message: String },

    #[error("frame source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("evidence capture failed: {message}")]
    CaptureIo { message: String },

    #[error("notification delivery failed: {message}")]
    Delivery { message: String },

    #[error("event log append failed: {message}")]
    LogIo { message: String },
}

pub type MotionResult<T> = Result<T, MotionError>;

impl MotionError {
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: msg.into(),
        }
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: msg.into(),
        }
    }

    pub fn capture_io(msg: impl Into<String>) -> Self {
        Self::CaptureIo {
            message: msg.into(),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery {
            message: msg.into(),
        }
    }

    pub fn log_io(msg: impl Into<String>) -> Self {
        Self::LogIo {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_names_both_shapes() {
        let err = MotionError::DimensionMismatch {
            previous: FrameShape {
                width: 640,
                height: 480,
                channels: 3,
            },
            current: FrameShape {
                width: 320,
                height: 240,
                channels: 3,
            },
        };
        let message = err.to_string();
        assert!(message.contains("640x480x3"));
        assert!(message.contains("320x240x3"));
    }
}
