//! Alert debounce and source-availability state machine.
//!
//! Two independent sub-states:
//!
//! - motion: `Idle` <-> `Cooldown`. A qualifying report in `Idle` raises one
//!   `AlertEvent` and starts the cooldown. Nothing is raised until
//!   `now - last_alert_time > cooldown`, after which the machine is idle again.
//! - source: `Open` <-> `Lost`. The first unavailability signal raises one
//!   `SourceLostEvent`; repeats are swallowed until the source is back.
//!
//! The machine never fails. It only classifies inputs.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::detect::{Blob, MotionReport};
use crate::evidence::ArtifactRef;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Externally observable composite state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertState {
    Idle,
    Cooldown,
    SourceLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Open,
    Lost,
}

/// Motion alert raised by the state machine.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub blobs: Vec<Blob>,
    /// Set once the evidence frame has been persisted.
    pub evidence: Option<ArtifactRef>,
}

impl AlertEvent {
    /// One-line summary for logs and notification bodies.
    pub fn summary(&self) -> String {
        let blobs: Vec<String> = self.blobs.iter().map(|b| b.to_string()).collect();
        format!("blobs={} [{}]", self.blobs.len(), blobs.join(", "))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLostEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRestoredEvent {
    pub timestamp: DateTime<Utc>,
    pub lost_since: DateTime<Utc>,
}

/// What the machine decided for one motion report.
#[derive(Clone, Debug)]
pub enum MotionDecision {
    Alert(AlertEvent),
    /// Qualifying motion swallowed by the cooldown.
    Suppressed,
    /// Nothing qualified.
    Quiet,
    /// Source is lost; motion is not evaluated.
    SourceLost,
}

#[derive(Clone, Debug)]
pub struct CooldownState {
    last_alert_time: Option<DateTime<Utc>>,
    cooldown_duration: Duration,
}

impl CooldownState {
    pub fn new(cooldown_duration: Duration) -> Self {
        Self {
            last_alert_time: None,
            cooldown_duration,
        }
    }

    pub fn last_alert_time(&self) -> Option<DateTime<Utc>> {
        self.last_alert_time
    }

    pub fn cooldown_duration(&self) -> Duration {
        self.cooldown_duration
    }

    /// True until strictly more than `cooldown_duration` has passed since the
    /// last alert. A clock that steps backwards keeps the cooldown active.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_alert_time else {
            return false;
        };
        match (now - last).to_std() {
            Ok(elapsed) => elapsed <= self.cooldown_duration,
            Err(_) => true,
        }
    }
}

pub struct AlertStateMachine {
    cooldown: CooldownState,
    source: SourceState,
    lost_alert_sent: bool,
    lost_since: Option<DateTime<Utc>>,
}

impl AlertStateMachine {
    pub fn new(cooldown_duration: Duration) -> Self {
        Self {
            cooldown: CooldownState::new(cooldown_duration),
            source: SourceState::Open,
            lost_alert_sent: false,
            lost_since: None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> AlertState {
        if self.source == SourceState::Lost {
            AlertState::SourceLost
        } else if self.cooldown.in_cooldown(now) {
            AlertState::Cooldown
        } else {
            AlertState::Idle
        }
    }

    pub fn source_state(&self) -> SourceState {
        self.source
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    pub fn on_motion(&mut self, now: DateTime<Utc>, report: &MotionReport) -> MotionDecision {
        if self.source == SourceState::Lost {
            return MotionDecision::SourceLost;
        }
        if self.cooldown.in_cooldown(now) {
            return if report.any_qualifies {
                MotionDecision::Suppressed
            } else {
                MotionDecision::Quiet
            };
        }
        if !report.any_qualifies {
            return MotionDecision::Quiet;
        }
        self.cooldown.last_alert_time = Some(now);
        MotionDecision::Alert(AlertEvent {
            timestamp: now,
            blobs: report.blobs.clone(),
            evidence: None,
        })
    }

    pub fn on_source_unavailable(
        &mut self,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Option<SourceLostEvent> {
        if self.source == SourceState::Open {
            self.source = SourceState::Lost;
            self.lost_since = Some(now);
        }
        if self.lost_alert_sent {
            return None;
        }
        self.lost_alert_sent = true;
        Some(SourceLostEvent {
            timestamp: now,
            reason: reason.to_string(),
        })
    }

    pub fn on_source_available(&mut self, now: DateTime<Utc>) -> Option<SourceRestoredEvent> {
        if self.source == SourceState::Open {
            return None;
        }
        self.source = SourceState::Open;
        self.lost_alert_sent = false;
        let lost_since = self.lost_since.take().unwrap_or(now);
        Some(SourceRestoredEvent {
            timestamp: now,
            lost_since,
        })
    }
}

impl Default for AlertStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
