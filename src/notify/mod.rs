//! Outbound alert delivery.
//!
//! Transports:
//! - `LogNotifier`: writes the alert to the operational log (no network).
//! - `WebhookNotifier`: HTTP POST of a JSON document.
//! - `MqttNotifier`: QoS 1 publish of the same JSON document.
//!
//! Delivery is at-most-once. A failed delivery is reported to the caller and
//! not retried.

pub mod mqtt;
pub mod webhook;

pub use mqtt::{MqttNotifier, MqttSettings};
pub use webhook::WebhookNotifier;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MotionResult;
use crate::evidence::ArtifactRef;

pub const MOTION_SUBJECT: &str = "Motion Detected";
pub const MOTION_BODY: &str = "Motion has been detected in the monitored area.";
pub const SOURCE_LOST_SUBJECT: &str = "Camera Error";
pub const SOURCE_LOST_BODY: &str = "Camera feed has been lost or disconnected.";

pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&ArtifactRef>,
    ) -> MotionResult<()>;
}

/// JSON document sent by the network transports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<ArtifactRef>,
    pub sent_at: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(subject: &str, body: &str, attachment: Option<&ArtifactRef>) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
            attachment: attachment.cloned(),
            sent_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&ArtifactRef>,
    ) -> MotionResult<()> {
        match attachment {
            Some(artifact) => log::warn!("ALERT {}: {} [evidence {}]", subject, body, artifact),
            None => log::warn!("ALERT {}: {}", subject, body),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    #[default]
    Log,
    Webhook,
    Mqtt,
}

impl std::str::FromStr for NotifyKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "webhook" => Ok(Self::Webhook),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(anyhow::anyhow!(
                "unknown notify kind '{}' (expected log|webhook|mqtt)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn payload_omits_missing_attachment() {
        let payload = NotificationPayload::new(SOURCE_LOST_SUBJECT, SOURCE_LOST_BODY, None);
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains("Camera Error"));
        assert!(!json.contains("attachment"));
    }

    #[test]
    fn payload_includes_attachment_digest() {
        let artifact = ArtifactRef {
            path: PathBuf::from("evidence/motion_20231114_221320.jpg"),
            sha256: "ab".repeat(32),
        };
        let payload = NotificationPayload::new(MOTION_SUBJECT, MOTION_BODY, Some(&artifact));
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains("motion_20231114_221320.jpg"));
        assert!(json.contains(&"ab".repeat(32)));
    }

    #[test]
    fn notify_kind_parses_case_insensitively() {
        assert_eq!("Webhook".parse::<NotifyKind>().unwrap(), NotifyKind::Webhook);
        assert_eq!(" mqtt ".parse::<NotifyKind>().unwrap(), NotifyKind::Mqtt);
        assert!("smtp".parse::<NotifyKind>().is_err());
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(MOTION_SUBJECT, MOTION_BODY, None).is_ok());
    }
}
