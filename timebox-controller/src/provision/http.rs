//! REST provisioning backend
//!
//! `DELETE {base}/resources/{id}` destroys, `PATCH {base}/resources/{id}/labels`
//! labels. Locator entries travel as query parameters.

use super::{ProvisionError, Provisioner};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::BTreeMap;
use timebox_common::{DestroyOutcome, DestroyRequest};
use url::Url;

pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Serialize)]
struct LabelPatch<'a> {
    labels: &'a BTreeMap<String, String>,
}

impl HttpProvisioner {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("provisioner base_url cannot carry a path: {}", base_url);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("timebox/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// `{base}/resources/{id}[/suffix]` with the id percent-encoded
    pub fn resource_url(&self, resource_id: &str, suffix: Option<&str>) -> Result<Url, ProvisionError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ProvisionError::Permanent(format!("invalid provisioner URL {}", self.base_url))
            })?;
            segments.pop_if_empty().push("resources").push(resource_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn destroy(&self, request: &DestroyRequest) -> Result<DestroyOutcome, ProvisionError> {
        let url = self.resource_url(&request.resource_id, None)?;
        let response = self
            .authorize(self.client.delete(url).query(&request.locator))
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(DestroyOutcome::Destroyed),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(DestroyOutcome::AlreadyGone),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(s, &body))
            }
        }
    }

    async fn write_labels(
        &self,
        resource_id: &str,
        locator: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionError> {
        let url = self.resource_url(resource_id, Some("labels"))?;
        let response = self
            .authorize(
                self.client
                    .patch(url)
                    .query(locator)
                    .json(&LabelPatch { labels }),
            )
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Auth failures and malformed requests will not fix themselves
pub fn classify_status(status: StatusCode, body: &str) -> ProvisionError {
    let message = if body.is_empty() {
        format!("provisioner returned {}", status)
    } else {
        format!("provisioner returned {}: {}", status, body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::BAD_REQUEST
        | StatusCode::METHOD_NOT_ALLOWED
        | StatusCode::UNPROCESSABLE_ENTITY => ProvisionError::Permanent(message),
        _ => ProvisionError::Transient(message),
    }
}

fn classify_request_error(e: reqwest::Error) -> ProvisionError {
    if e.is_builder() {
        ProvisionError::Permanent(format!("invalid provisioner request: {}", e))
    } else {
        ProvisionError::Transient(format!("provisioner request failed: {}", e))
    }
}
