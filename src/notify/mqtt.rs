use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::time::Duration;

use super::{NotificationPayload, Notifier};
use crate::error::{MotionError, MotionResult};
use crate::evidence::ArtifactRef;

pub const DEFAULT_MQTT_TOPIC: &str = "motion_sentry/alerts";
pub const DEFAULT_MQTT_CLIENT_ID: &str = "motiond";
const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    /// `host:port`, optionally prefixed with `mqtt://`.
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Publishes alerts with QoS 1. The connection is driven on its own thread.
pub struct MqttNotifier {
    client: Client,
    topic: String,
}

impl MqttNotifier {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker_addr(&settings.broker)?;
        if settings.topic.trim().is_empty() {
            return Err(anyhow!("mqtt topic cannot be empty"));
        }
        let mut options = MqttOptions::new(&settings.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }

        let (client, connection) = Client::new(options, 10);
        spawn_connection_driver(connection).context("spawn mqtt connection thread")?;
        log::info!(
            "MQTT notifier configured for {} (auth: {})",
            settings.broker,
            settings.username.is_some()
        );
        Ok(Self {
            client,
            topic: settings.topic.clone(),
        })
    }
}

fn spawn_connection_driver(mut connection: Connection) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("mqtt-connection".into())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        std::thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        })
        .map(|_| ())
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&ArtifactRef>,
    ) -> MotionResult<()> {
        let payload = NotificationPayload::new(subject, body, attachment);
        let json = serde_json::to_vec(&payload)
            .map_err(|e| MotionError::delivery(format!("encode payload: {}", e)))?;
        self.client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, json)
            .map_err(|e| MotionError::delivery(format!("mqtt publish failed: {}", e)))
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        let _ = self.client.try_disconnect();
    }
}

fn parse_broker_addr(broker: &str) -> Result<(String, u16)> {
    let trimmed = broker.trim();
    let without_scheme = trimmed.strip_prefix("mqtt://").unwrap_or(trimmed);
    if without_scheme.is_empty() || without_scheme.contains("://") {
        return Err(anyhow!("invalid mqtt broker address '{}'", broker));
    }
    match without_scheme.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| anyhow!("invalid mqtt broker port in '{}'", broker))?;
            if host.is_empty() {
                return Err(anyhow!("missing mqtt broker host in '{}'", broker));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((without_scheme.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_addresses() {
        assert_eq!(
            parse_broker_addr("127.0.0.1:1884").unwrap(),
            ("127.0.0.1".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_addr("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert!(parse_broker_addr("broker:notaport").is_err());
        assert!(parse_broker_addr("tcp://broker:1883").is_err());
        assert!(parse_broker_addr(":1883").is_err());
    }
}
