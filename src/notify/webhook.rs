use anyhow::{anyhow, Result};
use std::time::Duration;

use super::{NotificationPayload, Notifier};
use crate::error::{MotionError, MotionResult};
use crate::evidence::ArtifactRef;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs alerts as JSON to an HTTP endpoint.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("webhook url must start with http:// or https://"));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify(
        &self,
        subject: &str,
        body: &str,
        attachment: Option<&ArtifactRef>,
    ) -> MotionResult<()> {
        let payload = NotificationPayload::new(subject, body, attachment);
        let json = serde_json::to_string(&payload)
            .map_err(|e| MotionError::delivery(format!("encode payload: {}", e)))?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&json)
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(MotionError::delivery(format!(
                "webhook {} returned HTTP {}",
                self.url, code
            ))),
            Err(e) => Err(MotionError::delivery(format!(
                "webhook {} unreachable: {}",
                self.url, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Accepts one request, answers with `status`, and hands back the body.
    fn one_shot_server(status: u16) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        let body = text[split + 4..split + 4 + content_length].to_string();
                        let _ = tx.send(body);
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = stream.write_all(response.as_bytes());
        });
        (format!("http://{}/hook", addr), rx)
    }

    #[test]
    fn posts_json_payload() {
        let (url, rx) = one_shot_server(200);
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();
        notifier
            .notify("Motion Detected", "blobs=1", None)
            .expect("delivered");
        let body = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let payload: NotificationPayload = serde_json::from_str(&body).unwrap();
        assert_eq!(payload.subject, "Motion Detected");
        assert_eq!(payload.body, "blobs=1");
    }

    #[test]
    fn server_error_is_a_delivery_error() {
        let (url, _rx) = one_shot_server(500);
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();
        let err = notifier.notify("Camera Error", "lost", None).unwrap_err();
        assert!(matches!(err, MotionError::Delivery { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(WebhookNotifier::new("ftp://example", DEFAULT_WEBHOOK_TIMEOUT).is_err());
    }
}
