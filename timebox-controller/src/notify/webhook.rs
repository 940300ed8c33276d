//! HTTP webhook notices

use super::{render_message, NotifyError};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use timebox_common::ExpiryNotice;

pub const EXPIRY_EVENT: &str = "resource.expiring";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    #[serde(flatten)]
    notice: &'a ExpiryNotice,
    message: String,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    headers: Vec<(String, String)>,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration, headers: Vec<(String, String)>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("timebox/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, headers })
    }

    pub async fn send(&self, url: &str, notice: &ExpiryNotice) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            event: EXPIRY_EVENT,
            notice,
            message: render_message(notice),
        };

        let mut request = self.client.post(url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(classify_request_error)?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(resource_id = %notice.resource_id, %url, "Webhook notice delivered");
            return Ok(());
        }

        let message = format!("webhook {} returned {}", url, status);
        if is_retryable(status) {
            Err(NotifyError::Transient(message))
        } else {
            Err(NotifyError::Permanent(message))
        }
    }
}

/// 408, 429 and server errors are worth another attempt
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn classify_request_error(e: reqwest::Error) -> NotifyError {
    if e.is_builder() {
        NotifyError::Permanent(format!("invalid webhook request: {}", e))
    } else {
        NotifyError::Transient(format!("webhook request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::GONE));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let notifier = WebhookNotifier::new(Duration::from_secs(2), Vec::new()).unwrap();
        let notice = ExpiryNotice {
            resource_id: "vm-1".to_string(),
            destroy_at: chrono::Utc::now(),
            notify_at: chrono::Utc::now(),
            current_time: chrono::Utc::now(),
            target: "http://127.0.0.1:1/hook".to_string(),
        };

        let err = notifier.send(&notice.target, &notice).await.unwrap_err();
        assert!(!err.is_permanent());
    }
}
