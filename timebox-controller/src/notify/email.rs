//! Email notices over SMTP

use super::{render_message, NotifyError};
use crate::config::SmtpConfig;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use timebox_common::ExpiryNotice;

pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        };

        let mut builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid from_address '{}': {}", config.from_address, e))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    pub async fn send(&self, address: &str, notice: &ExpiryNotice) -> Result<(), NotifyError> {
        let to: Mailbox = address.parse().map_err(|e| {
            NotifyError::Permanent(format!("invalid email address '{}': {}", address, e))
        })?;

        let email = build_message(self.from.clone(), to, notice)?;

        match self.transport.send(email).await {
            Ok(_) => {
                tracing::debug!(resource_id = %notice.resource_id, %address, "Email notice sent");
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                Err(NotifyError::Permanent(format!("SMTP rejected notice: {}", e)))
            }
            Err(e) => Err(NotifyError::Transient(format!("SMTP delivery failed: {}", e))),
        }
    }
}

fn build_message(from: Mailbox, to: Mailbox, notice: &ExpiryNotice) -> Result<Message, NotifyError> {
    Message::builder()
        .from(from)
        .to(to)
        .subject(format!("[timebox] {} expires soon", notice.resource_id))
        .header(ContentType::TEXT_PLAIN)
        .body(render_message(notice))
        .map_err(|e| NotifyError::Permanent(format!("failed to build email: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(use_tls: bool) -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".to_string(),
            port: 2525,
            from_address: "timebox@example.com".to_string(),
            username: None,
            password: None,
            use_tls,
        }
    }

    #[test]
    fn test_rejects_bad_from_address() {
        let mut config = smtp(false);
        config.from_address = "not an address".to_string();
        assert!(EmailNotifier::from_config(&config).is_err());
    }

    #[test]
    fn test_message_subject_names_resource() {
        let notice = ExpiryNotice {
            resource_id: "cluster-a".to_string(),
            destroy_at: chrono::Utc::now(),
            notify_at: chrono::Utc::now(),
            current_time: chrono::Utc::now(),
            target: "ops@example.com".to_string(),
        };
        let message = build_message(
            "timebox@example.com".parse().unwrap(),
            "ops@example.com".parse().unwrap(),
            &notice,
        )
        .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [timebox] cluster-a expires soon"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let notifier = EmailNotifier::from_config(&smtp(false)).unwrap();
        let notice = ExpiryNotice {
            resource_id: "cluster-a".to_string(),
            destroy_at: chrono::Utc::now(),
            notify_at: chrono::Utc::now(),
            current_time: chrono::Utc::now(),
            target: "nobody".to_string(),
        };

        let err = notifier.send("nobody", &notice).await.unwrap_err();
        assert!(err.is_permanent());
    }
}
