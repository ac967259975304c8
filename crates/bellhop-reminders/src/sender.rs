use async_trait::async_trait;
use bellhop_core::ReminderDirective;
use tracing::{debug, info, warn};

use crate::error::SendError;

/// Header carrying the shared secret on webhook deliveries.
pub const WEBHOOK_KEY_HEADER: &str = "x-bellhop-webhook-key";

/// Delivers one reminder. Implementations decide the channel (email, SMS, …).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, directive: &ReminderDirective) -> Result<(), SendError>;
}

/// POSTs each directive as JSON to a configured URL.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    key: Option<String>,
}

impl WebhookSender {
    pub fn new(url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            key,
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, directive: &ReminderDirective) -> Result<(), SendError> {
        debug!(job_key = %directive.job_key, url = %self.url, "posting reminder webhook");

        let mut builder = self.client.post(&self.url).json(directive);
        if let Some(key) = &self.key {
            builder = builder.header(WEBHOOK_KEY_HEADER, key);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_builder() {
                SendError::Permanent(format!("invalid webhook request: {e}"))
            } else {
                SendError::Transient(format!("webhook request failed: {e}"))
            }
        })?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, job_key = %directive.job_key, "reminder webhook rejected");
        Err(classify_status(status, &text))
    }
}

/// Map a non-2xx webhook status to a send error.
///
/// 429 and 5xx are retried; every other status means the receiver will not
/// accept this reminder no matter how often it is sent.
pub fn classify_status(status: u16, body: &str) -> SendError {
    let msg = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    match status {
        429 | 500..=599 => SendError::Transient(msg),
        _ => SendError::Permanent(msg),
    }
}

/// Logs reminders instead of delivering them. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, directive: &ReminderDirective) -> Result<(), SendError> {
        info!(
            job_key = %directive.job_key,
            appointment_id = %directive.appointment_id,
            kind = %directive.kind,
            to = %directive.recipient_contact,
            start_time = %directive.start_time,
            "reminder (log only)"
        );
        Ok(())
    }
}
