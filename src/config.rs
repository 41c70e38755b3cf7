use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::alert::DEFAULT_COOLDOWN;
use crate::detect::{DetectionConfig, DiffConfig, DEFAULT_AREA_THRESHOLD};
use crate::dispatch::DispatchConfig;
use crate::driver::{MonitorSettings, DEFAULT_HEALTH_INTERVAL, DEFAULT_RETRY_INTERVAL};
use crate::evidence::{EvidenceConfig, DEFAULT_EVIDENCE_DIR, DEFAULT_EVIDENCE_PREFIX};
use crate::ingest::SourceConfig;
use crate::notify::mqtt::{MqttNotifier, MqttSettings, DEFAULT_MQTT_CLIENT_ID, DEFAULT_MQTT_TOPIC};
use crate::notify::webhook::{WebhookNotifier, DEFAULT_WEBHOOK_TIMEOUT};
use crate::notify::{LogNotifier, Notifier, NotifyKind};
use crate::storage::{EventLogBackend, DEFAULT_LOG_PATH};

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    alert: Option<AlertConfigFile>,
    evidence: Option<EvidenceConfigFile>,
    event_log: Option<EventLogConfigFile>,
    notify: Option<NotifyConfigFile>,
    dispatch: Option<DispatchConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    blur_kernel: Option<u32>,
    blur_sigma: Option<f64>,
    threshold: Option<u8>,
    dilate_kernel: Option<u32>,
    dilate_iterations: Option<u32>,
    area_threshold: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
    retry_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvidenceConfigFile {
    dir: Option<PathBuf>,
    prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EventLogConfigFile {
    backend: Option<EventLogBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NotifyConfigFile {
    kind: Option<NotifyKind>,
    webhook_url: Option<String>,
    webhook_timeout_ms: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DispatchConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceConfig,
    pub detection: DetectionConfig,
    pub alert: AlertSettings,
    pub evidence: EvidenceConfig,
    pub event_log: EventLogSettings,
    pub notify: NotifySettings,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown: Duration,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct EventLogSettings {
    pub backend: EventLogBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub kind: NotifyKind,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub mqtt_broker: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    /// Environment only.
    pub mqtt_username: Option<String>,
    /// Environment only.
    pub mqtt_password: Option<String>,
}

impl NotifySettings {
    /// Construct the configured transport.
    pub fn build(&self) -> Result<Arc<dyn Notifier>> {
        match self.kind {
            NotifyKind::Log => Ok(Arc::new(LogNotifier)),
            NotifyKind::Webhook => {
                let url = self
                    .webhook_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("webhook notify requires a webhook url"))?;
                Ok(Arc::new(WebhookNotifier::new(url, self.webhook_timeout)?))
            }
            NotifyKind::Mqtt => {
                let broker = self
                    .mqtt_broker
                    .clone()
                    .ok_or_else(|| anyhow!("mqtt notify requires a broker"))?;
                let settings = MqttSettings {
                    broker,
                    topic: self.mqtt_topic.clone(),
                    client_id: self.mqtt_client_id.clone(),
                    username: self.mqtt_username.clone(),
                    password: self.mqtt_password.clone(),
                };
                Ok(Arc::new(MqttNotifier::connect(&settings)?))
            }
        }
    }
}

/// Values given on the command line; they win over file and environment.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub source_url: Option<String>,
}

impl MonitorConfig {
    /// Defaults, then the JSON file named by `MOTION_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTION_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_from_with(path, &ConfigOverrides::default())
    }

    /// Like `load_from`, with command-line overrides applied after the
    /// environment and before validation.
    pub fn load_from_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        if let Some(url) = &overrides.source_url {
            cfg.source.url = url.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            frame_interval: self.source.frame_interval(),
            retry_interval: self.alert.retry_interval,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            max_frames: None,
        }
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceConfig::default();
        let source = SourceConfig {
            url: source_file.url.unwrap_or(source_defaults.url),
            target_fps: source_file.target_fps.unwrap_or(source_defaults.target_fps),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
            max_frames: source_file.max_frames,
            read_timeout: source_file
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(source_defaults.read_timeout),
        };

        let detection_file = file.detection.unwrap_or_default();
        let diff_defaults = DiffConfig::default();
        let detection = DetectionConfig {
            diff: DiffConfig {
                blur_kernel: detection_file
                    .blur_kernel
                    .unwrap_or(diff_defaults.blur_kernel),
                blur_sigma: detection_file.blur_sigma.unwrap_or(diff_defaults.blur_sigma),
                threshold: detection_file.threshold.unwrap_or(diff_defaults.threshold),
                dilate_kernel: detection_file
                    .dilate_kernel
                    .unwrap_or(diff_defaults.dilate_kernel),
                dilate_iterations: detection_file
                    .dilate_iterations
                    .unwrap_or(diff_defaults.dilate_iterations),
            },
            area_threshold: detection_file
                .area_threshold
                .unwrap_or(DEFAULT_AREA_THRESHOLD),
        };

        let alert_file = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            cooldown: alert_file
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            retry_interval: alert_file
                .retry_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_INTERVAL),
        };

        let evidence_file = file.evidence.unwrap_or_default();
        let evidence = EvidenceConfig {
            dir: evidence_file
                .dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EVIDENCE_DIR)),
            prefix: evidence_file
                .prefix
                .unwrap_or_else(|| DEFAULT_EVIDENCE_PREFIX.to_string()),
        };

        let event_log_file = file.event_log.unwrap_or_default();
        let event_log = EventLogSettings {
            backend: event_log_file.backend.unwrap_or_default(),
            path: event_log_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
        };

        let notify_file = file.notify.unwrap_or_default();
        let mqtt_file = notify_file.mqtt.unwrap_or_default();
        let notify = NotifySettings {
            kind: notify_file.kind.unwrap_or_default(),
            webhook_url: notify_file.webhook_url,
            webhook_timeout: notify_file
                .webhook_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT),
            mqtt_broker: mqtt_file.broker,
            mqtt_topic: mqtt_file
                .topic
                .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
            mqtt_client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            mqtt_username: None,
            mqtt_password: None,
        };

        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            workers: dispatch_file.workers.unwrap_or(dispatch_defaults.workers),
            queue_capacity: dispatch_file
                .queue_capacity
                .unwrap_or(dispatch_defaults.queue_capacity),
            shutdown_grace: dispatch_file
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(dispatch_defaults.shutdown_grace),
        };

        Self {
            source,
            detection,
            alert,
            evidence,
            event_log,
            notify,
            dispatch,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("MOTION_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(secs) = env_nonempty("MOTION_COOLDOWN_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                anyhow!("MOTION_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert.cooldown = Duration::from_secs(secs);
        }
        if let Some(area) = env_nonempty("MOTION_AREA_THRESHOLD") {
            self.detection.area_threshold = area
                .parse()
                .map_err(|_| anyhow!("MOTION_AREA_THRESHOLD must be a non-negative integer"))?;
        }
        if let Some(dir) = env_nonempty("MOTION_EVIDENCE_DIR") {
            self.evidence.dir = PathBuf::from(dir);
        }
        if let Some(path) = env_nonempty("MOTION_LOG_PATH") {
            self.event_log.path = PathBuf::from(path);
        }
        if let Some(kind) = env_nonempty("MOTION_NOTIFY") {
            self.notify.kind = kind.parse().context("MOTION_NOTIFY")?;
        }
        if let Some(url) = env_nonempty("MOTION_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(broker) = env_nonempty("MOTION_MQTT_BROKER") {
            self.notify.mqtt_broker = Some(broker);
        }
        self.notify.mqtt_username = env_nonempty("MOTION_MQTT_USERNAME");
        self.notify.mqtt_password = env_nonempty("MOTION_MQTT_PASSWORD");
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.source.url = self.source.url.trim().to_string();
        if self.source.url.is_empty() {
            return Err(anyhow!("source url cannot be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }

        let diff = &self.detection.diff;
        validate_kernel("blur_kernel", diff.blur_kernel)?;
        validate_kernel("dilate_kernel", diff.dilate_kernel)?;
        if !diff.blur_sigma.is_finite() {
            return Err(anyhow!("blur_sigma must be finite"));
        }

        if self.alert.retry_interval.is_zero() {
            return Err(anyhow!("retry_interval_ms must be greater than zero"));
        }
        if self.dispatch.workers == 0 {
            return Err(anyhow!("dispatch workers must be at least 1"));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(anyhow!("dispatch queue_capacity must be at least 1"));
        }

        match self.notify.kind {
            NotifyKind::Log => {}
            NotifyKind::Webhook => {
                let url = self.notify.webhook_url.as_deref().unwrap_or("").trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(anyhow!("webhook notify requires an http(s) webhook_url"));
                }
            }
            NotifyKind::Mqtt => {
                if self
                    .notify
                    .mqtt_broker
                    .as_deref()
                    .map_or(true, |b| b.trim().is_empty())
                {
                    return Err(anyhow!("mqtt notify requires a broker"));
                }
                if self.notify.mqtt_topic.trim().is_empty() {
                    return Err(anyhow!("mqtt topic cannot be empty"));
                }
            }
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

fn validate_kernel(name: &str, size: u32) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(anyhow!("{} must be odd and at least 1 (got {})", name, size));
    }
    Ok(())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<MonitorConfig> {
        let file: MonitorConfigFile = serde_json::from_str(json)?;
        let mut cfg = MonitorConfig::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn defaults_match_reference_pipeline() {
        let cfg = parse("{}").unwrap();
        assert_eq!(cfg.detection.diff.blur_kernel, 5);
        assert_eq!(cfg.detection.diff.threshold, 20);
        assert_eq!(cfg.detection.diff.dilate_iterations, 3);
        assert_eq!(cfg.detection.area_threshold, 5000);
        assert_eq!(cfg.alert.cooldown, Duration::from_secs(10));
        assert_eq!(cfg.event_log.path, PathBuf::from("motion_log.txt"));
        assert_eq!(cfg.notify.kind, NotifyKind::Log);
    }

    #[test]
    fn rejects_even_kernels() {
        let err = parse(r#"{"detection": {"blur_kernel": 4}}"#).unwrap_err();
        assert!(err.to_string().contains("blur_kernel"));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(parse(r#"{"detection": {"blur": 5}}"#).is_err());
    }

    #[test]
    fn webhook_requires_url() {
        assert!(parse(r#"{"notify": {"kind": "webhook"}}"#).is_err());
        let cfg = parse(r#"{"notify": {"kind": "webhook", "webhook_url": "http://hooks.local/motion"}}"#)
            .unwrap();
        assert_eq!(cfg.notify.kind, NotifyKind::Webhook);
    }

    #[test]
    fn rejects_zero_workers_and_queue() {
        assert!(parse(r#"{"dispatch": {"workers": 0}}"#).is_err());
        assert!(parse(r#"{"dispatch": {"queue_capacity": 0}}"#).is_err());
    }

    #[test]
    fn monitor_settings_follow_fps() {
        let cfg = parse(r#"{"source": {"target_fps": 5}, "alert": {"retry_interval_ms": 250}}"#)
            .unwrap();
        let settings = cfg.monitor_settings();
        assert_eq!(settings.frame_interval, Duration::from_millis(200));
        assert_eq!(settings.retry_interval, Duration::from_millis(250));
    }
}
