//! Pre-expiry notification dispatch
//!
//! A notification target is either an HTTP(S) webhook URL or an email
//! address (optionally written as `mailto:`). Failures are classified as
//! transient (retried on the next tick) or permanent (never retried).

pub mod email;
pub mod webhook;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

use crate::config::NotifierConfig;
use async_trait::async_trait;
use thiserror::Error;
use timebox_common::ExpiryNotice;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("transient notification failure: {0}")]
    Transient(String),

    #[error("permanent notification failure: {0}")]
    Permanent(String),
}

impl NotifyError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, NotifyError::Permanent(_))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &ExpiryNotice) -> Result<(), NotifyError>;
}

/// Kind of channel a notification target resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<'a> {
    Webhook(&'a str),
    Email(&'a str),
    Unsupported,
}

impl<'a> Target<'a> {
    pub fn parse(target: &'a str) -> Self {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            Target::Webhook(target)
        } else if let Some(address) = target.strip_prefix("mailto:") {
            Target::Email(address)
        } else if target.contains('@') && !target.contains(':') {
            Target::Email(target)
        } else {
            Target::Unsupported
        }
    }
}

/// Routes each notice to the channel its target names
pub struct NotificationDispatcher {
    webhook: WebhookNotifier,
    email: Option<EmailNotifier>,
}

impl NotificationDispatcher {
    pub fn new(webhook: WebhookNotifier, email: Option<EmailNotifier>) -> Self {
        Self { webhook, email }
    }

    pub fn from_config(config: &NotifierConfig) -> anyhow::Result<Self> {
        let webhook = WebhookNotifier::new(
            std::time::Duration::from_secs(config.webhook_timeout_secs),
            config.webhook_headers.clone(),
        )?;

        let email = match &config.smtp {
            Some(smtp) => Some(EmailNotifier::from_config(smtp)?),
            None => None,
        };

        Ok(Self::new(webhook, email))
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify(&self, notice: &ExpiryNotice) -> Result<(), NotifyError> {
        match Target::parse(&notice.target) {
            Target::Webhook(url) => self.webhook.send(url, notice).await,
            Target::Email(address) => match &self.email {
                Some(email) => email.send(address, notice).await,
                None => Err(NotifyError::Permanent(
                    "email target given but no SMTP relay is configured".to_string(),
                )),
            },
            Target::Unsupported => Err(NotifyError::Permanent(format!(
                "unsupported notification target '{}'",
                notice.target
            ))),
        }
    }
}

/// Plain-text body shared by all channels
pub fn render_message(notice: &ExpiryNotice) -> String {
    let remaining = notice.destroy_at - notice.current_time;
    let minutes = remaining.num_minutes().max(0);
    format!(
        "Resource {} will be destroyed at {} ({}h {}m from now). \
         Extend or deregister it before then to keep it.",
        notice.resource_id,
        notice.destroy_at.to_rfc3339(),
        minutes / 60,
        minutes % 60
    )
}
