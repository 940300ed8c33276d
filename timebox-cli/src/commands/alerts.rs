//! Escalation alert commands

use crate::api::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List firing alerts
    List,
    /// Show recently fired and resolved alerts
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Alert {
    id: String,
    resource_id: String,
    kind: String,
    severity: String,
    status: String,
    message: String,
    consecutive_failures: u32,
    fired_at: DateTime<Utc>,
    #[serde(default)]
    resolved_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct AlertRow {
    resource: String,
    kind: String,
    severity: String,
    status: String,
    failures: u32,
    fired: String,
    message: String,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        let severity = match alert.severity.as_str() {
            "critical" => alert.severity.red().bold().to_string(),
            _ => alert.severity.yellow().to_string(),
        };
        Self {
            resource: alert.resource_id.clone(),
            kind: alert.kind.clone(),
            severity,
            status: alert.status.clone(),
            failures: alert.consecutive_failures,
            fired: output::format_time(alert.fired_at),
            message: alert.message.clone(),
        }
    }
}

pub async fn handle_alert_command(command: AlertCommands, api: &ApiClient, format: OutputFormat) -> Result<()> {
    let alerts: Vec<Alert> = match command {
        AlertCommands::List => api.get("/api/alerts").await?,
        AlertCommands::History { limit } => {
            api.get(&format!("/api/alerts/history?limit={}", limit)).await?
        }
    };

    output::print_output(&alerts, |a| AlertRow::from(a), format)
}
