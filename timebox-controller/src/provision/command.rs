//! External-command provisioning backend
//!
//! Runs an argv such as `terraform destroy -auto-approve -var id={resource_id}`.
//! No shell is involved; placeholders are substituted per argument.

use super::{ProvisionError, Provisioner};
use crate::config::CommandProvisionerConfig;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Output;
use timebox_common::{DestroyOutcome, DestroyRequest};
use tokio::process::Command;

pub struct CommandProvisioner {
    config: CommandProvisionerConfig,
    placeholder: Regex,
}

impl CommandProvisioner {
    pub fn new(config: CommandProvisionerConfig) -> anyhow::Result<Self> {
        if config.destroy_command.is_empty() {
            anyhow::bail!("command provisioner needs a non-empty destroy_command");
        }

        Ok(Self {
            config,
            placeholder: Regex::new(r"\{(resource_id|labels|locator\.[A-Za-z0-9_.-]+)\}")?,
        })
    }

    /// Substitute placeholders in every argument
    pub fn render(
        &self,
        template: &[String],
        resource_id: &str,
        locator: &BTreeMap<String, String>,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<String>, ProvisionError> {
        let labels = labels.map(|l| {
            l.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        });

        template
            .iter()
            .map(|arg| {
                let mut missing = None;
                let rendered = self.placeholder.replace_all(arg, |caps: &regex::Captures| {
                    let name = &caps[1];
                    if name == "resource_id" {
                        resource_id.to_string()
                    } else if name == "labels" {
                        labels.clone().unwrap_or_default()
                    } else {
                        let key = &name["locator.".len()..];
                        locator.get(key).cloned().unwrap_or_else(|| {
                            missing = Some(key.to_string());
                            String::new()
                        })
                    }
                });

                match missing {
                    Some(key) => Err(ProvisionError::Permanent(format!(
                        "locator key '{}' required by command is missing",
                        key
                    ))),
                    None => Ok(rendered.into_owned()),
                }
            })
            .collect()
    }

    async fn run(&self, argv: &[String]) -> Result<Output, ProvisionError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ProvisionError::Permanent("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(program = %program, "Running provisioner command");

        // A command that cannot even be started will not start next tick either
        cmd.output()
            .await
            .map_err(|e| ProvisionError::Permanent(format!("failed to run {}: {}", program, e)))
    }

    fn reports_not_found(&self, output: &Output) -> bool {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        self.config
            .not_found_markers
            .iter()
            .any(|m| stdout.contains(m.as_str()) || stderr.contains(m.as_str()))
    }
}

fn failure(output: &Output) -> ProvisionError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    ProvisionError::Transient(format!("command exited with {}: {}", code, stderr.trim()))
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn destroy(&self, request: &DestroyRequest) -> Result<DestroyOutcome, ProvisionError> {
        let argv = self.render(
            &self.config.destroy_command,
            &request.resource_id,
            &request.locator,
            None,
        )?;
        let output = self.run(&argv).await?;

        if output.status.success() {
            Ok(DestroyOutcome::Destroyed)
        } else if self.reports_not_found(&output) {
            Ok(DestroyOutcome::AlreadyGone)
        } else {
            Err(failure(&output))
        }
    }

    async fn write_labels(
        &self,
        resource_id: &str,
        locator: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), ProvisionError> {
        if self.config.label_command.is_empty() {
            tracing::debug!(%resource_id, "No label command configured, skipping labels");
            return Ok(());
        }

        let argv = self.render(&self.config.label_command, resource_id, locator, Some(labels))?;
        let output = self.run(&argv).await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(failure(&output))
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
