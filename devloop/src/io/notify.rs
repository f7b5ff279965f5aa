//! Outbound notifications for cycle events and status reports.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::io::config::NotifyConfig;

/// A single message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub is_error: bool,
}

impl Notification {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            is_error: false,
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            is_error: true,
        }
    }
}

pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, notification: &Notification) -> Result<()> {
        (**self).notify(notification)
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if notification.is_error {
            error!(title = %notification.title, body = %notification.body, "notification");
        } else {
            info!(title = %notification.title, body = %notification.body, "notification");
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Notifier for WebhookNotifier {
    #[instrument(skip_all, fields(url = %self.url))]
    fn notify(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_value(notification).context("serialize notification")?;
        match self.agent.post(&self.url).send_json(body) {
            Ok(_) => {
                debug!("webhook delivered");
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("webhook returned HTTP {code}")),
            Err(err) => Err(err).context("post webhook"),
        }
    }
}

/// Webhook notifier when a URL is configured, log notifier otherwise.
pub fn notifier_from_config(cfg: &NotifyConfig) -> Box<dyn Notifier + Send + Sync> {
    match cfg.webhook_url.as_deref() {
        Some(url) => Box::new(WebhookNotifier::new(url, Duration::from_secs(10))),
        None => Box::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn log_notifier_accepts_both_kinds() {
        assert!(LogNotifier.notify(&Notification::info("t", "b")).is_ok());
        assert!(LogNotifier.notify(&Notification::error("t", "b")).is_ok());
    }

    #[test]
    fn unreachable_webhook_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/hook", listener.local_addr().expect("addr"));
        drop(listener);

        let notifier = WebhookNotifier::new(url, Duration::from_secs(2));
        assert!(notifier.notify(&Notification::info("t", "b")).is_err());
    }

    #[test]
    fn notification_serializes_flat() {
        let json = serde_json::to_value(Notification::error("Cycle aborted", "boom")).expect("json");
        assert_eq!(
            json,
            serde_json::json!({"title": "Cycle aborted", "body": "boom", "is_error": true})
        );
    }
}
