//! Off-thread side effects: evidence capture, notification, event log.
//!
//! The loop thread only enqueues. A fixed pool of workers drains a bounded
//! queue, and a single writer thread owns the event log. Records land in the
//! order the writer receives them: source events are appended from the loop
//! thread at once, motion records only after their evidence capture, so a
//! motion record can follow a later source event. Every record carries its
//! event's timestamp.
//!
//! Submission never blocks the loop. When the queue is full the notification
//! is dropped, but the log record is still written. On shutdown workers get a
//! grace period. Queued jobs and motion jobs still capturing are then
//! downgraded to log-only records, and the log writer is always flushed
//! before `shutdown` returns.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::{AlertEvent, SourceLostEvent, SourceRestoredEvent};
use crate::evidence::{ArtifactRef, EvidenceStore};
use crate::frame::Frame;
use crate::notify::{Notifier, MOTION_BODY, MOTION_SUBJECT, SOURCE_LOST_BODY, SOURCE_LOST_SUBJECT};
use crate::storage::{EventKind, EventLog, LogRecord};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Maximum notifications in flight at once.
    pub workers: usize,
    pub queue_capacity: usize,
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Collaborators invoked by the workers.
#[derive(Clone)]
pub struct Collaborators {
    pub evidence: Arc<dyn EvidenceStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Counters accumulated over the dispatcher's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: u64,
    pub delivery_failures: u64,
    /// Notifications never attempted (queue full or abandoned at shutdown).
    pub dropped: u64,
    pub capture_failures: u64,
    pub log_failures: u64,
    pub abandoned_workers: usize,
}

enum Job {
    Motion { event: AlertEvent, frame: Frame },
    SourceLost(SourceLostEvent),
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
    dropped: AtomicU64,
    capture_failures: AtomicU64,
    log_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, abandoned_workers: usize) -> DispatchReport {
        DispatchReport {
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            abandoned_workers,
        }
    }
}

struct Shared {
    queue: Mutex<Receiver<Job>>,
    abandon: AtomicBool,
    counters: Counters,
    /// Motion alerts taken by a worker but not yet logged, by worker index.
    /// Entries are added under the queue lock and removed only while holding
    /// this lock, together with the log append.
    unlogged: Mutex<HashMap<usize, AlertEvent>>,
}

// ----------------------------------------------------------------------------
// Log writer
// ----------------------------------------------------------------------------

enum LogMessage {
    Append(LogRecord),
    Stop,
}

#[derive(Clone)]
struct LogHandle {
    tx: Sender<LogMessage>,
}

impl LogHandle {
    fn append(&self, record: LogRecord, counters: &Counters) {
        let kind = record.kind;
        if self.tx.send(LogMessage::Append(record)).is_err() {
            log::error!("event log writer is gone; {} record lost", kind);
            Counters::bump(&counters.log_failures);
        }
    }
}

fn spawn_log_writer(
    mut event_log: Box<dyn EventLog>,
    shared: Arc<Shared>,
) -> Result<(LogHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<LogMessage>();
    let handle = std::thread::Builder::new()
        .name("event-log".into())
        .spawn(move || {
            for message in rx {
                match message {
                    LogMessage::Append(record) => {
                        if let Err(e) =
                            event_log.append_event(record.timestamp, record.kind, &record.detail)
                        {
                            log::error!("{}", e);
                            Counters::bump(&shared.counters.log_failures);
                        }
                    }
                    LogMessage::Stop => break,
                }
            }
            if let Err(e) = event_log.flush() {
                log::error!("{}", e);
                Counters::bump(&shared.counters.log_failures);
            }
        })
        .context("spawn event log writer")?;
    Ok((LogHandle { tx }, handle))
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

pub struct Dispatcher {
    tx: Option<SyncSender<Job>>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    done_rx: Receiver<()>,
    log: LogHandle,
    log_thread: Option<JoinHandle<()>>,
    grace: Duration,
}

impl Dispatcher {
    pub fn start(
        config: DispatchConfig,
        collaborators: Collaborators,
        event_log: Box<dyn EventLog>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Job>(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            queue: Mutex::new(rx),
            abandon: AtomicBool::new(false),
            counters: Counters::default(),
            unlogged: Mutex::new(HashMap::new()),
        });
        let (log, log_thread) = spawn_log_writer(event_log, shared.clone())?;

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut workers = Vec::with_capacity(config.workers.max(1));
        for index in 0..config.workers.max(1) {
            let worker = Worker {
                index,
                shared: shared.clone(),
                collaborators: collaborators.clone(),
                log: log.clone(),
            };
            let done = DoneGuard(done_tx.clone());
            let handle = std::thread::Builder::new()
                .name(format!("notify-{}", index))
                .spawn(move || {
                    let _done = done;
                    worker.run();
                })
                .context("spawn notification worker")?;
            workers.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            shared,
            workers,
            done_rx,
            log,
            log_thread: Some(log_thread),
            grace: config.shutdown_grace,
        })
    }

    /// Queue a motion alert: capture, log, then notify, off the loop thread.
    pub fn submit_motion(&self, event: AlertEvent, frame: Frame) {
        self.enqueue(Job::Motion { event, frame });
    }

    /// Log the outage now and queue the notification.
    pub fn submit_source_lost(&self, event: SourceLostEvent) {
        self.log.append(
            LogRecord::new(event.timestamp, EventKind::SourceLost, event.reason.clone()),
            &self.shared.counters,
        );
        self.enqueue(Job::SourceLost(event));
    }

    pub fn record_source_restored(&self, event: &SourceRestoredEvent) {
        let outage = event.timestamp - event.lost_since;
        self.log.append(
            LogRecord::new(
                event.timestamp,
                EventKind::SourceRestored,
                format!("outage={}s", outage.num_seconds()),
            ),
            &self.shared.counters,
        );
    }

    pub fn report(&self) -> DispatchReport {
        self.shared.counters.report(0)
    }

    fn enqueue(&self, job: Job) {
        let Some(tx) = &self.tx else {
            record_only(job, &self.log, &self.shared.counters);
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::warn!("notification queue full; notification dropped");
                record_only(job, &self.log, &self.shared.counters);
            }
            Err(TrySendError::Disconnected(job)) => {
                log::warn!("notification workers gone; notification dropped");
                record_only(job, &self.log, &self.shared.counters);
            }
        }
    }

    /// Close the queue, give workers the grace period, then flush the log.
    pub fn shutdown(mut self) -> DispatchReport {
        drop(self.tx.take());

        let deadline = Instant::now() + self.grace;
        let mut finished = 0;
        while finished < self.workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(()) => finished += 1,
                Err(_) => break,
            }
        }

        let abandoned = self.workers.len() - finished;
        if abandoned > 0 {
            self.shared.abandon.store(true, Ordering::SeqCst);
            log::warn!(
                "{} notification worker(s) still busy after {:?}; abandoning in-flight deliveries",
                abandoned,
                self.grace
            );
            let queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            while let Ok(job) = queue.try_recv() {
                record_only(job, &self.log, &self.shared.counters);
            }
            drop(queue);

            // Alerts a busy worker has not logged yet; the worker skips them.
            let mut unlogged = self
                .shared
                .unlogged
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut pending: Vec<AlertEvent> =
                unlogged.drain().map(|(_, event)| event).collect();
            pending.sort_by_key(|event| event.timestamp);
            for event in pending {
                Counters::bump(&self.shared.counters.dropped);
                self.log.append(motion_record(&event), &self.shared.counters);
            }
        }
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        let _ = self.log.tx.send(LogMessage::Stop);
        if let Some(handle) = self.log_thread.take() {
            if handle.join().is_err() {
                log::error!("event log writer panicked");
            }
        }

        self.shared.counters.report(abandoned)
    }
}

struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

struct Worker {
    index: usize,
    shared: Arc<Shared>,
    collaborators: Collaborators,
    log: LogHandle,
}

impl Worker {
    fn run(self) {
        loop {
            let job = {
                // Idle workers queue on the mutex; the holder blocks in recv
                // only until a job arrives or every sender is dropped.
                let queue = self
                    .shared
                    .queue
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let job = queue.recv();
                if let Ok(Job::Motion { event, .. }) = &job {
                    self.shared
                        .unlogged
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(self.index, event.clone());
                }
                job
            };
            let Ok(job) = job else {
                break;
            };
            if self.shared.abandon.load(Ordering::SeqCst) {
                let pending = match &job {
                    Job::Motion { event, .. } => self.log_if_pending(event),
                    Job::SourceLost(_) => true,
                };
                if pending {
                    Counters::bump(&self.shared.counters.dropped);
                }
                continue;
            }
            match job {
                Job::Motion { event, frame } => self.run_motion(event, &frame),
                Job::SourceLost(_) => self.deliver(SOURCE_LOST_SUBJECT, SOURCE_LOST_BODY, None),
            }
        }
    }

    fn run_motion(&self, mut event: AlertEvent, frame: &Frame) {
        if event.evidence.is_none() {
            match self.collaborators.evidence.capture(frame, &event.blobs) {
                Ok(artifact) => event.evidence = Some(artifact),
                Err(e) => {
                    log::warn!("{}; alert proceeds without evidence", e);
                    Counters::bump(&self.shared.counters.capture_failures);
                }
            }
        }
        if !self.log_if_pending(&event) {
            return;
        }
        let body = format!("{}\n{}", MOTION_BODY, event.summary());
        self.deliver(MOTION_SUBJECT, &body, event.evidence.as_ref());
    }

    /// Append the record unless shutdown already wrote it for this worker.
    fn log_if_pending(&self, event: &AlertEvent) -> bool {
        let mut unlogged = self
            .shared
            .unlogged
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if unlogged.remove(&self.index).is_none() {
            return false;
        }
        self.log.append(motion_record(event), &self.shared.counters);
        true
    }

    fn deliver(&self, subject: &str, body: &str, attachment: Option<&ArtifactRef>) {
        let counters = &self.shared.counters;
        match self.collaborators.notifier.notify(subject, body, attachment) {
            Ok(()) => {
                Counters::bump(&counters.delivered);
                log::info!(
                    "'{}' delivered via {}",
                    subject,
                    self.collaborators.notifier.name()
                );
            }
            Err(e) => {
                Counters::bump(&counters.delivery_failures);
                log::warn!("{}", e);
            }
        }
    }
}

fn motion_record(event: &AlertEvent) -> LogRecord {
    let evidence = event
        .evidence
        .as_ref()
        .map(|a| a.path.display().to_string())
        .unwrap_or_else(|| "none".to_string());
    LogRecord::new(
        event.timestamp,
        EventKind::MotionDetected,
        format!("{} evidence={}", event.summary(), evidence),
    )
}

/// Keep the durable record for a job whose notification will not be sent.
fn record_only(job: Job, log: &LogHandle, counters: &Counters) {
    Counters::bump(&counters.dropped);
    if let Job::Motion { event, .. } = job {
        log.append(motion_record(&event), counters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Blob;
    use crate::error::{MotionError, MotionResult};
    use crate::storage::InMemoryEventLog;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 4], 2, 2, 1, t(0)).unwrap()
    }

    fn alert(secs: i64) -> AlertEvent {
        AlertEvent {
            timestamp: t(secs),
            blobs: vec![Blob {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
                area: 12,
            }],
            evidence: None,
        }
    }

    struct FixedEvidence;

    impl EvidenceStore for FixedEvidence {
        fn capture(&self, _frame: &Frame, _marks: &[Blob]) -> MotionResult<ArtifactRef> {
            Ok(ArtifactRef {
                path: PathBuf::from("evidence/motion_x.jpg"),
                sha256: "00".repeat(32),
            })
        }
    }

    struct BrokenEvidence;

    struct SlowEvidence(Duration);

    impl EvidenceStore for SlowEvidence {
        fn capture(&self, _frame: &Frame, _marks: &[Blob]) -> MotionResult<ArtifactRef> {
            std::thread::sleep(self.0);
            Ok(ArtifactRef {
                path: PathBuf::from("evidence/motion_slow.jpg"),
                sha256: "11".repeat(32),
            })
        }
    }

    #[derive(Default)]
    struct MarkedEvidence {
        marks: Mutex<Vec<Vec<Blob>>>,
    }

    impl EvidenceStore for MarkedEvidence {
        fn capture(&self, _frame: &Frame, marks: &[Blob]) -> MotionResult<ArtifactRef> {
            self.marks.lock().unwrap().push(marks.to_vec());
            Ok(ArtifactRef {
                path: PathBuf::from("evidence/motion_marked.jpg"),
                sha256: "22".repeat(32),
            })
        }
    }

    impl EvidenceStore for BrokenEvidence {
        fn capture(&self, _frame: &Frame, _marks: &[Blob]) -> MotionResult<ArtifactRef> {
            Err(MotionError::capture_io("disk full"))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Option<ArtifactRef>)>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn notify(
            &self,
            subject: &str,
            _body: &str,
            attachment: Option<&ArtifactRef>,
        ) -> MotionResult<()> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail {
                return Err(MotionError::delivery("smtp down"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), attachment.cloned()));
            Ok(())
        }
    }

    fn start(
        config: DispatchConfig,
        evidence: Arc<dyn EvidenceStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> (Dispatcher, InMemoryEventLog) {
        let log = InMemoryEventLog::new();
        let dispatcher = Dispatcher::start(
            config,
            Collaborators { evidence, notifier },
            Box::new(log.clone()),
        )
        .unwrap();
        (dispatcher, log)
    }

    #[test]
    fn motion_job_captures_logs_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (dispatcher, log) = start(
            DispatchConfig::default(),
            Arc::new(FixedEvidence),
            notifier.clone(),
        );
        dispatcher.submit_motion(alert(0), frame());
        let report = dispatcher.shutdown();

        assert_eq!(report.delivered, 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].0, MOTION_SUBJECT);
        assert!(sent[0].1.is_some());

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::MotionDetected);
        assert!(records[0].detail.contains("evidence=evidence/motion_x.jpg"));
    }

    #[test]
    fn capture_failure_still_notifies_without_attachment() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (dispatcher, log) = start(
            DispatchConfig::default(),
            Arc::new(BrokenEvidence),
            notifier.clone(),
        );
        dispatcher.submit_motion(alert(0), frame());
        let report = dispatcher.shutdown();

        assert_eq!(report.capture_failures, 1);
        assert_eq!(report.delivered, 1);
        assert!(notifier.sent.lock().unwrap()[0].1.is_none());
        assert!(log.records()[0].detail.ends_with("evidence=none"));
    }

    #[test]
    fn delivery_failure_is_counted_not_retried() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });
        let (dispatcher, log) = start(
            DispatchConfig::default(),
            Arc::new(FixedEvidence),
            notifier,
        );
        dispatcher.submit_motion(alert(0), frame());
        let report = dispatcher.shutdown();
        assert_eq!(report.delivery_failures, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(log.records().len(), 1);
    }

    #[test]
    fn source_events_are_logged_in_order() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (dispatcher, log) = start(
            DispatchConfig::default(),
            Arc::new(FixedEvidence),
            notifier.clone(),
        );
        dispatcher.submit_source_lost(SourceLostEvent {
            timestamp: t(0),
            reason: "read failed".into(),
        });
        dispatcher.record_source_restored(&SourceRestoredEvent {
            timestamp: t(7),
            lost_since: t(0),
        });
        dispatcher.shutdown();

        let kinds: Vec<EventKind> = log.records().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![EventKind::SourceLost, EventKind::SourceRestored]);
        assert_eq!(log.records()[1].detail, "outage=7s");
        assert_eq!(notifier.sent.lock().unwrap()[0].0, SOURCE_LOST_SUBJECT);
    }

    #[test]
    fn slow_delivery_is_abandoned_but_every_alert_is_logged() {
        let notifier = Arc::new(RecordingNotifier {
            delay: Some(Duration::from_millis(500)),
            ..RecordingNotifier::default()
        });
        let config = DispatchConfig {
            workers: 1,
            queue_capacity: 8,
            shutdown_grace: Duration::from_millis(50),
        };
        let (dispatcher, log) = start(config, Arc::new(FixedEvidence), notifier);
        for secs in 0..4 {
            dispatcher.submit_motion(alert(secs), frame());
        }
        let started = Instant::now();
        let report = dispatcher.shutdown();

        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(report.abandoned_workers, 1);
        assert!(report.dropped >= 2);
        let motion_records = log
            .records()
            .iter()
            .filter(|r| r.kind == EventKind::MotionDetected)
            .count();
        assert_eq!(motion_records, 4);
    }

    #[test]
    fn alert_still_capturing_at_shutdown_is_logged_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = DispatchConfig {
            workers: 1,
            queue_capacity: 4,
            shutdown_grace: Duration::from_millis(50),
        };
        let (dispatcher, log) = start(
            config,
            Arc::new(SlowEvidence(Duration::from_millis(400))),
            notifier.clone(),
        );
        dispatcher.submit_motion(alert(0), frame());
        // Let the worker pick the job up before shutting down.
        std::thread::sleep(Duration::from_millis(50));
        let report = dispatcher.shutdown();

        assert_eq!(report.abandoned_workers, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.log_failures, 0);
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::MotionDetected);
        assert_eq!(records[0].timestamp, t(0));
        assert!(records[0].detail.ends_with("evidence=none"));

        // The worker finishes capturing after shutdown and must neither log nor notify.
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(log.records().len(), 1);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn capture_receives_alert_blobs() {
        let evidence = Arc::new(MarkedEvidence::default());
        let (dispatcher, _log) = start(
            DispatchConfig::default(),
            evidence.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        let event = alert(0);
        let blobs = event.blobs.clone();
        dispatcher.submit_motion(event, frame());
        dispatcher.shutdown();
        assert_eq!(*evidence.marks.lock().unwrap(), vec![blobs]);
    }

    #[test]
    fn source_event_can_be_logged_before_an_earlier_alert() {
        let (dispatcher, log) = start(
            DispatchConfig::default(),
            Arc::new(SlowEvidence(Duration::from_millis(100))),
            Arc::new(RecordingNotifier::default()),
        );
        dispatcher.submit_motion(alert(0), frame());
        dispatcher.submit_source_lost(SourceLostEvent {
            timestamp: t(1),
            reason: "read failed".into(),
        });
        dispatcher.shutdown();

        let records = log.records();
        let order: Vec<(EventKind, DateTime<Utc>)> =
            records.iter().map(|r| (r.kind, r.timestamp)).collect();
        assert_eq!(
            order,
            vec![
                (EventKind::SourceLost, t(1)),
                (EventKind::MotionDetected, t(0))
            ]
        );
    }

    #[test]
    fn full_queue_drops_notification_but_logs() {
        let notifier = Arc::new(RecordingNotifier {
            delay: Some(Duration::from_millis(200)),
            ..RecordingNotifier::default()
        });
        let config = DispatchConfig {
            workers: 1,
            queue_capacity: 1,
            shutdown_grace: Duration::from_secs(5),
        };
        let (dispatcher, log) = start(config, Arc::new(FixedEvidence), notifier);
        for secs in 0..5 {
            dispatcher.submit_motion(alert(secs), frame());
        }
        let report = dispatcher.shutdown();

        assert!(report.dropped >= 3);
        assert_eq!(report.delivered + report.dropped, 5);
        assert_eq!(log.records().len(), 5);
    }
}
