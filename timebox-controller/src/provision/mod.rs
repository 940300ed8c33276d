//! Destruction executor
//!
//! Adapters that ask the provisioning system to tear a resource down and
//! to stamp lifecycle labels on it.

pub mod command;
pub mod http;

pub use command::CommandProvisioner;
pub use http::HttpProvisioner;

use crate::config::ProvisionerConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use timebox_common::{DestroyOutcome, DestroyRequest};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// Network trouble, timeouts, provider hiccups
    #[error("transient provisioning failure: {0}")]
    Transient(String),

    /// Bad credentials, malformed request, missing tooling
    #[error("permanent provisioning failure: {0}")]
    Permanent(String),
}

impl ProvisionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProvisionError::Transient(_))
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Destroy the resource. A resource that is already gone is a success.
    async fn destroy(&self, request: &DestroyRequest) -> Result<DestroyOutcome, ProvisionError>;

    /// Attach lifecycle labels to the resource
    async fn write_labels(
        &self,
        resource_id: &str,
        locator: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionError>;

    fn name(&self) -> &'static str;
}

pub fn from_config(config: &ProvisionerConfig) -> anyhow::Result<Arc<dyn Provisioner>> {
    let provisioner: Arc<dyn Provisioner> = match config {
        ProvisionerConfig::Http(http) => Arc::new(HttpProvisioner::new(
            &http.base_url,
            http.token.clone(),
        )?),
        ProvisionerConfig::Command(cmd) => Arc::new(CommandProvisioner::new(cmd.clone())?),
    };

    tracing::info!(provisioner = provisioner.name(), "Provisioner configured");
    Ok(provisioner)
}
