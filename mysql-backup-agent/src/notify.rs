//! Outcome notifications.
//!
//! Every operation reports once, success or failure, to every configured
//! channel. A channel that cannot deliver is logged and skipped; it never
//! changes the operation's result.

use crate::config::NotifyConfig;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub host: String,
    pub operation: String,
    pub status: Status,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(operation: &str, status: Status, message: impl Into<String>) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            host,
            operation: operation.to_string(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(operation: &str, message: impl Into<String>) -> Self {
        Self::new(operation, Status::Success, message)
    }

    pub fn failure(operation: &str, message: impl Into<String>) -> Self {
        Self::new(operation, Status::Failure, message)
    }
}

pub trait Notifier {
    fn name(&self) -> String;
    fn notify(&self, notification: &Notification) -> impl Future<Output = Result<()>>;
}

/// Writes the outcome to the log. Always configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> String {
        "log".to_string()
    }

    async fn notify(&self, n: &Notification) -> Result<()> {
        match n.status {
            Status::Success => info!(operation = %n.operation, host = %n.host, "{}", n.message),
            Status::Failure => error!(operation = %n.operation, host = %n.host, "{}", n.message),
        }
        Ok(())
    }
}

/// POSTs the notification as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> String {
        format!("webhook {}", self.url)
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub enum Channel {
    Log(LogNotifier),
    Webhook(WebhookNotifier),
}

impl Notifier for Channel {
    fn name(&self) -> String {
        match self {
            Channel::Log(n) => n.name(),
            Channel::Webhook(n) => n.name(),
        }
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        match self {
            Channel::Log(n) => n.notify(notification).await,
            Channel::Webhook(n) => n.notify(notification).await,
        }
    }
}

pub struct NotifierSet {
    channels: Vec<Channel>,
}

impl NotifierSet {
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut channels = vec![Channel::Log(LogNotifier)];
        for url in &config.webhook_urls {
            match WebhookNotifier::new(url.clone()) {
                Ok(webhook) => channels.push(Channel::Webhook(webhook)),
                Err(e) => warn!(url = %url, error = %e, "Webhook channel disabled"),
            }
        }
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver to every channel; returns how many accepted the notification.
    pub async fn notify_all(&self, notification: &Notification) -> usize {
        let mut delivered = 0;
        for channel in &self.channels {
            match channel.notify(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(channel = %channel.name(), error = %e, "Notification not delivered"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_payload_fields() {
        let n = Notification::failure("backup", "lock timeout");
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["operation"], "backup");
        assert_eq!(value["status"], "failure");
        assert_eq!(value["message"], "lock timeout");
        assert!(value["host"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_receives_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if text.contains("\r\n\r\n") && text.trim_end().ends_with('}') {
                    break;
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let set = NotifierSet::from_config(&NotifyConfig {
            webhook_urls: vec![url],
        });
        assert_eq!(set.len(), 2);
        let delivered = set
            .notify_all(&Notification::success("restore", "restored full_20260301000000"))
            .await;
        assert_eq!(delivered, 2);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"status\":\"success\""));
        assert!(request.contains("full_20260301000000"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail_others() {
        let set = NotifierSet::from_config(&NotifyConfig {
            webhook_urls: vec!["http://127.0.0.1:9/unreachable".into()],
        });
        let delivered = set.notify_all(&Notification::success("list", "ok")).await;
        assert_eq!(delivered, 1);
    }
}
