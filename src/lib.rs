//! Motion Sentry
//!
//! Frame-differencing motion detector for a single camera feed.
//!
//! # Architecture
//!
//! One loop thread pulls frames and decides; side effects run elsewhere:
//!
//! 1. **Ingest**: a `FrameSource` is polled for availability, then read.
//! 2. **Detect**: consecutive frames are differenced, smoothed, thresholded
//!    and dilated into a binary mask (`DiffDetector`); connected regions above
//!    the area threshold become blobs (`BlobExtractor`).
//! 3. **Decide**: `AlertStateMachine` debounces alerts with a cooldown and
//!    raises a single source-lost alert per outage.
//! 4. **Dispatch**: evidence capture, notification and the event log run on
//!    the `Dispatcher`'s threads so transport latency never stalls ingest.
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers and shapes
//! - `ingest`: frame sources (synthetic, image sequence, HTTP snapshot)
//! - `detect`: diff mask and blob extraction
//! - `alert`: cooldown and source-availability state machine
//! - `evidence`, `notify`, `storage`: side-effect collaborators
//! - `dispatch`: worker pool and log writer
//! - `driver`: the run loop
//! - `config`: file and environment configuration

pub mod alert;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod storage;

pub use alert::{
    AlertEvent, AlertState, AlertStateMachine, MotionDecision, SourceLostEvent,
    SourceRestoredEvent, SourceState,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigOverrides, MonitorConfig};
pub use detect::{
    Blob, BlobExtractor, DetectionConfig, DiffConfig, DiffDetector, DiffMask, MotionPipeline,
    MotionReport,
};
pub use dispatch::{Collaborators, DispatchConfig, DispatchReport, Dispatcher};
pub use driver::{Monitor, MonitorSettings, RunSummary, StepOutcome, StopSignal, Termination};
pub use error::{FrameShape, MotionError, MotionResult};
pub use evidence::{ArtifactRef, EvidenceConfig, EvidenceStore, FilesystemEvidenceStore};
pub use frame::Frame;
pub use ingest::{ConfiguredSource, FrameSource, ReadOutcome, SourceConfig, SourceStatus};
pub use notify::{LogNotifier, Notifier, NotifyKind};
pub use storage::{EventKind, EventLog, EventLogBackend, InMemoryEventLog, LogRecord};
