//! Run loop: poll the source, diff consecutive frames, decide, dispatch.
//!
//! All detection work happens on the calling thread. Side effects leave
//! through the [`Dispatcher`], so a slow notifier never delays the next read.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{AlertState, AlertStateMachine, MotionDecision};
use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::detect::MotionPipeline;
use crate::dispatch::{Collaborators, DispatchReport, Dispatcher};
use crate::error::{MotionError, MotionResult};
use crate::evidence::FilesystemEvidenceStore;
use crate::frame::Frame;
use crate::ingest::{ConfiguredSource, FrameSource, ReadOutcome, SourceStats, SourceStatus};
use crate::storage::open_event_log;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Cooperative stop flag shared with signal handlers.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, waking early on stop. Returns true if stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    /// Minimum spacing between reads.
    pub frame_interval: Duration,
    /// Wait between reads while the source is unavailable.
    pub retry_interval: Duration,
    pub health_interval: Duration,
    /// End the run after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            max_frames: None,
        }
    }
}

/// Result of feeding one frame through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No previous frame; this one becomes the baseline.
    Baseline,
    Quiet,
    Alerted,
    /// Qualifying motion inside the cooldown window.
    Suppressed,
    /// Frame pair not evaluated (shape mismatch or source lost).
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Stopped,
    EndOfStream,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub frames: u64,
    pub alerts: u64,
    pub suppressed: u64,
    pub skipped: u64,
    pub source_lost_events: u64,
    pub termination: Termination,
    pub source: SourceStats,
    pub dispatch: DispatchReport,
}

#[derive(Default)]
struct RunCounters {
    frames: u64,
    alerts: u64,
    suppressed: u64,
    skipped: u64,
    source_lost_events: u64,
}

pub struct Monitor {
    source: Box<dyn FrameSource>,
    clock: Box<dyn Clock>,
    pipeline: MotionPipeline,
    alerts: AlertStateMachine,
    dispatcher: Dispatcher,
    settings: MonitorSettings,
    previous: Option<Frame>,
    counters: RunCounters,
}

impl Monitor {
    pub fn new(
        source: Box<dyn FrameSource>,
        clock: Box<dyn Clock>,
        pipeline: MotionPipeline,
        alerts: AlertStateMachine,
        dispatcher: Dispatcher,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            source,
            clock,
            pipeline,
            alerts,
            dispatcher,
            settings,
            previous: None,
            counters: RunCounters::default(),
        }
    }

    /// Wire the configured source, evidence store, event log and notifier.
    pub fn from_config(cfg: &MonitorConfig) -> anyhow::Result<Self> {
        let source = ConfiguredSource::new(cfg.source.clone())?;
        let evidence = FilesystemEvidenceStore::new(cfg.evidence.clone())
            .context("open evidence store")?;
        let event_log = open_event_log(cfg.event_log.backend, &cfg.event_log.path)
            .context("open event log")?;
        let notifier = cfg.notify.build()?;
        log::info!(
            "notify via {}, evidence in {}, event log {}",
            notifier.name(),
            evidence.root().display(),
            cfg.event_log.path.display()
        );
        let dispatcher = Dispatcher::start(
            cfg.dispatch.clone(),
            Collaborators {
                evidence: Arc::new(evidence),
                notifier,
            },
            event_log,
        )?;
        Ok(Self::new(
            Box::new(source),
            Box::new(SystemClock),
            MotionPipeline::new(cfg.detection.clone()),
            AlertStateMachine::new(cfg.alert.cooldown),
            dispatcher,
            cfg.monitor_settings(),
        ))
    }

    pub fn settings_mut(&mut self) -> &mut MonitorSettings {
        &mut self.settings
    }

    pub fn alert_state(&self) -> AlertState {
        self.alerts.state(self.clock.now())
    }

    /// Diff `frame` against the previous one and act on the decision.
    pub fn step(&mut self, frame: Frame) -> StepOutcome {
        self.counters.frames += 1;
        let Some(previous) = self.previous.replace(frame.clone()) else {
            return StepOutcome::Baseline;
        };

        let report = match self.pipeline.detect(&previous, &frame) {
            Ok(report) => report,
            Err(e) => {
                log::warn!("{}; frame pair skipped", e);
                self.counters.skipped += 1;
                return StepOutcome::Skipped;
            }
        };
        log::debug!(
            "diff: foreground={} components={} qualifying={}",
            report.foreground_pixels,
            report.components,
            report.blobs.len()
        );

        match self.alerts.on_motion(self.clock.now(), &report) {
            MotionDecision::Alert(event) => {
                log::info!("motion detected: {}", event.summary());
                self.counters.alerts += 1;
                self.dispatcher.submit_motion(event, frame);
                StepOutcome::Alerted
            }
            MotionDecision::Suppressed => {
                log::debug!("motion suppressed by cooldown");
                self.counters.suppressed += 1;
                StepOutcome::Suppressed
            }
            MotionDecision::Quiet => StepOutcome::Quiet,
            MotionDecision::SourceLost => {
                self.counters.skipped += 1;
                StepOutcome::Skipped
            }
        }
    }

    /// Run until `stop` is raised or the source ends, then drain the dispatcher.
    pub fn run(mut self, stop: &StopSignal) -> RunSummary {
        if let Err(e) = self.source.connect() {
            self.source_unavailable(&e);
        }
        log::info!("monitoring {}", self.source.describe());

        let mut last_health_log = Instant::now();
        let termination = loop {
            if stop.is_stopped() {
                break Termination::Stopped;
            }
            if last_health_log.elapsed() >= self.settings.health_interval {
                self.log_health();
                last_health_log = Instant::now();
            }

            let started = Instant::now();
            match self.next_frame() {
                Ok(ReadOutcome::Frame(frame)) => {
                    self.source_available();
                    self.step(frame);
                }
                Ok(ReadOutcome::EndOfStream) => {
                    log::info!("{}: end of stream", self.source.describe());
                    break Termination::EndOfStream;
                }
                Err(e) => {
                    self.source_unavailable(&e);
                    if stop.wait(self.settings.retry_interval) {
                        break Termination::Stopped;
                    }
                    continue;
                }
            }

            if self
                .settings
                .max_frames
                .is_some_and(|max| self.counters.frames >= max)
            {
                log::info!("frame limit reached");
                break Termination::EndOfStream;
            }
            if let Some(rest) = self.settings.frame_interval.checked_sub(started.elapsed()) {
                if stop.wait(rest) {
                    break Termination::Stopped;
                }
            }
        };

        log::info!("monitor stopping ({:?})", termination);
        self.finish(termination)
    }

    /// Shut down the dispatcher and summarize.
    pub fn finish(self, termination: Termination) -> RunSummary {
        let source = self.source.stats();
        let dispatch = self.dispatcher.shutdown();
        RunSummary {
            frames: self.counters.frames,
            alerts: self.counters.alerts,
            suppressed: self.counters.suppressed,
            skipped: self.counters.skipped,
            source_lost_events: self.counters.source_lost_events,
            termination,
            source,
            dispatch,
        }
    }

    fn next_frame(&mut self) -> MotionResult<ReadOutcome> {
        if self.source.poll() == SourceStatus::Unavailable {
            return Err(MotionError::source_unavailable(format!(
                "{} not available",
                self.source.describe()
            )));
        }
        self.source.read()
    }

    fn source_unavailable(&mut self, error: &MotionError) {
        let now: DateTime<Utc> = self.clock.now();
        match self.alerts.on_source_unavailable(now, &error.to_string()) {
            Some(event) => {
                log::error!("source lost: {}", event.reason);
                self.counters.source_lost_events += 1;
                self.dispatcher.submit_source_lost(event);
            }
            None => log::debug!("still unavailable: {}", error),
        }
    }

    fn source_available(&mut self) {
        if let Some(event) = self.alerts.on_source_available(self.clock.now()) {
            log::info!("source restored after {}s", (event.timestamp - event.lost_since).num_seconds());
            // No diff across the outage.
            self.previous = None;
            self.dispatcher.record_source_restored(&event);
        }
    }

    fn log_health(&self) {
        let stats = self.source.stats();
        log::debug!(
            "health: state={:?} frames={} alerts={} read_failures={} source={}",
            self.alert_state(),
            self.counters.frames,
            self.counters.alerts,
            stats.read_failures,
            stats.source
        );
    }
}
