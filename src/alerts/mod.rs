//! Alert transports.
//!
//! Best-effort operator notifications. Delivery failures are logged and
//! never abort a session.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single alert channel. Returns true when delivery succeeded.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, severity: Severity, title: &str, body: &str) -> bool;
}

/// Sink that only logs. Default in development and tests.
pub struct NoopAlerts;

#[async_trait]
impl AlertSink for NoopAlerts {
    async fn send(&self, severity: Severity, title: &str, body: &str) -> bool {
        info!(%severity, title, body, "alert (noop)");
        true
    }
}

/// Telegram bot channel.
pub struct TelegramAlerts {
    http: Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramAlerts {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Option<Self> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build().ok()?;
        Some(Self {
            http,
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            base_url: "https://api.telegram.org".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl AlertSink for TelegramAlerts {
    async fn send(&self, severity: Severity, title: &str, body: &str) -> bool {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let text = format!("[{severity}] {title}\n{body}");
        let result = self
            .http
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "telegram alert rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "telegram alert failed");
                false
            }
        }
    }
}

/// ntfy.sh topic channel.
pub struct NtfyAlerts {
    http: Client,
    topic_url: String,
}

impl NtfyAlerts {
    pub fn new(topic_url: impl Into<String>) -> Option<Self> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build().ok()?;
        Some(Self {
            http,
            topic_url: topic_url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for NtfyAlerts {
    async fn send(&self, severity: Severity, title: &str, body: &str) -> bool {
        let priority = match severity {
            Severity::Info => "default",
            Severity::Warn => "high",
            Severity::Critical => "urgent",
        };
        let result = self
            .http
            .post(&self.topic_url)
            .header("Title", title)
            .header("Priority", priority)
            .body(body.to_string())
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "ntfy alert rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "ntfy alert failed");
                false
            }
        }
    }
}

/// Fan-out to several sinks; succeeds when any channel delivers.
pub struct CompositeAlerts {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl CompositeAlerts {
    pub fn new(sinks: Vec<Box<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for CompositeAlerts {
    async fn send(&self, severity: Severity, title: &str, body: &str) -> bool {
        let mut delivered = false;
        for sink in &self.sinks {
            delivered |= sink.send(severity, title, body).await;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recording {
        count: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl AlertSink for Recording {
        async fn send(&self, _severity: Severity, _title: &str, _body: &str) -> bool {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
    }

    #[tokio::test]
    async fn noop_always_succeeds() {
        assert!(NoopAlerts.send(Severity::Critical, "t", "b").await);
    }

    #[tokio::test]
    async fn composite_fans_out_and_ors_results() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeAlerts::new(vec![
            Box::new(Recording {
                count: count.clone(),
                succeed: false,
            }),
            Box::new(Recording {
                count: count.clone(),
                succeed: true,
            }),
        ]);
        assert!(composite.send(Severity::Warn, "t", "b").await);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn composite_of_failures_reports_failure() {
        let count = Arc::new(AtomicUsize::new(0));
        let composite = CompositeAlerts::new(vec![Box::new(Recording {
            count,
            succeed: false,
        })]);
        assert!(!composite.send(Severity::Info, "t", "b").await);
    }

    #[test]
    fn severity_formats_for_log_lines() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!(Severity::Warn.to_string(), "WARN");
    }
}
