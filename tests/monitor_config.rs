use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use motion_sentry::config::{ConfigOverrides, MonitorConfig};
use motion_sentry::{EventLogBackend, NotifyKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTION_CONFIG",
        "MOTION_SOURCE_URL",
        "MOTION_COOLDOWN_SECS",
        "MOTION_AREA_THRESHOLD",
        "MOTION_EVIDENCE_DIR",
        "MOTION_LOG_PATH",
        "MOTION_NOTIFY",
        "MOTION_WEBHOOK_URL",
        "MOTION_MQTT_BROKER",
        "MOTION_MQTT_USERNAME",
        "MOTION_MQTT_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "source": {
                "url": "/srv/camera/frames",
                "target_fps": 4,
                "max_frames": 120
            },
            "detection": {
                "blur_kernel": 7,
                "threshold": 30,
                "dilate_iterations": 2,
                "area_threshold": 2500
            },
            "alert": {
                "cooldown_secs": 30,
                "retry_interval_ms": 500
            },
            "evidence": {
                "dir": "/var/lib/motion/evidence",
                "prefix": "porch_"
            },
            "event_log": {
                "backend": "sqlite",
                "path": "/var/lib/motion/events.db"
            },
            "dispatch": {
                "workers": 3,
                "queue_capacity": 8,
                "shutdown_grace_ms": 1500
            }
        }"#,
    );

    std::env::set_var("MOTION_CONFIG", file.path());
    std::env::set_var("MOTION_COOLDOWN_SECS", "45");
    std::env::set_var("MOTION_LOG_PATH", "/tmp/override.db");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.source.url, "/srv/camera/frames");
    assert_eq!(cfg.source.target_fps, 4);
    assert_eq!(cfg.source.max_frames, Some(120));
    assert_eq!(cfg.detection.diff.blur_kernel, 7);
    assert_eq!(cfg.detection.diff.threshold, 30);
    assert_eq!(cfg.detection.diff.dilate_kernel, 3);
    assert_eq!(cfg.detection.diff.dilate_iterations, 2);
    assert_eq!(cfg.detection.area_threshold, 2500);
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(45));
    assert_eq!(cfg.alert.retry_interval, Duration::from_millis(500));
    assert_eq!(cfg.evidence.dir, PathBuf::from("/var/lib/motion/evidence"));
    assert_eq!(cfg.evidence.prefix, "porch_");
    assert_eq!(cfg.event_log.backend, EventLogBackend::Sqlite);
    assert_eq!(cfg.event_log.path, PathBuf::from("/tmp/override.db"));
    assert_eq!(cfg.dispatch.workers, 3);
    assert_eq!(cfg.dispatch.queue_capacity, 8);
    assert_eq!(cfg.dispatch.shutdown_grace, Duration::from_millis(1500));
    assert_eq!(cfg.notify.kind, NotifyKind::Log);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.source.url, "stub://front_camera");
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.detection.area_threshold, 5000);
    assert_eq!(cfg.evidence.prefix, "motion_");
    assert_eq!(cfg.event_log.backend, EventLogBackend::File);
    assert_eq!(cfg.dispatch.workers, 2);

    clear_env();
}

#[test]
fn mqtt_credentials_come_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "notify": {
                "kind": "mqtt",
                "mqtt": { "broker": "broker.local:1883", "topic": "home/porch/motion" }
            }
        }"#,
    );
    std::env::set_var("MOTION_CONFIG", file.path());
    std::env::set_var("MOTION_MQTT_USERNAME", "sentry");
    std::env::set_var("MOTION_MQTT_PASSWORD", "hunter2");

    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.notify.kind, NotifyKind::Mqtt);
    assert_eq!(cfg.notify.mqtt_broker.as_deref(), Some("broker.local:1883"));
    assert_eq!(cfg.notify.mqtt_topic, "home/porch/motion");
    assert_eq!(cfg.notify.mqtt_username.as_deref(), Some("sentry"));
    assert_eq!(cfg.notify.mqtt_password.as_deref(), Some("hunter2"));

    clear_env();
}

#[test]
fn env_notify_kind_requires_endpoint() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_NOTIFY", "webhook");
    let err = MonitorConfig::load().unwrap_err();
    assert!(err.to_string().contains("webhook"));

    std::env::set_var("MOTION_WEBHOOK_URL", "http://hooks.local/motion");
    let cfg = MonitorConfig::load().expect("load config");
    assert_eq!(cfg.notify.kind, NotifyKind::Webhook);

    clear_env();
}

#[test]
fn rejects_malformed_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_COOLDOWN_SECS", "ten");
    assert!(MonitorConfig::load().is_err());
    std::env::remove_var("MOTION_COOLDOWN_SECS");

    std::env::set_var("MOTION_NOTIFY", "carrier-pigeon");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}

#[test]
fn explicit_path_missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let err = MonitorConfig::load_from(Some(&dir.path().join("absent.json"))).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn command_line_source_wins_and_is_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_SOURCE_URL", "/srv/env/frames");
    let cfg = MonitorConfig::load_from_with(
        None,
        &ConfigOverrides {
            source_url: Some("  /srv/cli/frames ".into()),
        },
    )
    .expect("load config");
    assert_eq!(cfg.source.url, "/srv/cli/frames");

    let err = MonitorConfig::load_from_with(
        None,
        &ConfigOverrides {
            source_url: Some("   ".into()),
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("source url cannot be empty"));

    clear_env();
}
