//! API client for the timebox controller

use anyhow::Result;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    token: Option<String>,
}

/// Error body returned by the controller
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Path of a single resource, with the id percent-encoded
    pub fn resource_path(id: &str) -> String {
        format!("/api/resources/{}", urlencoding::encode(id))
    }

    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.request(method, &url);

        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => anyhow::bail!("{} ({}): {}", status, body.error, body.message),
            Err(_) => anyhow::bail!("API request failed: {} - {}", status, text),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.build_request(Method::GET, path).send().await?;
        let data = Self::check(response).await?.json().await?;
        Ok(data)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .build_request(Method::POST, path)
            .json(body)
            .send()
            .await?;
        let data = Self::check(response).await?.json().await?;
        Ok(data)
    }

    /// POST without a request body
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.build_request(Method::POST, path).send().await?;
        let data = Self::check(response).await?.json().await?;
        Ok(data)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.build_request(Method::DELETE, path).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
