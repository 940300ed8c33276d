//! Resource registration and inspection commands

use crate::api::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::Tabled;
use timebox_common::schedule::hours;
use timebox_common::{
    compute_schedule, LifecycleState, Registration, ResourceStatus, ScheduleRequest,
    DEFAULT_NOTIFY_LEAD_SECS,
};

#[derive(Subcommand)]
pub enum ResourceCommands {
    /// List tracked resources
    List {
        /// Only resources that are not destroyed yet
        #[arg(long)]
        pending: bool,
    },
    /// Show one resource and its lifecycle state
    Show { id: String },
    /// Register a resource for auto-destruction
    Register {
        /// Resource identifier
        id: String,
        /// Hours until destruction; zero or negative means "never destroy"
        #[arg(long, allow_negative_numbers = true)]
        ttl_hours: i64,
        /// Hours of advance notice before destruction
        #[arg(long, allow_negative_numbers = true)]
        lead_hours: Option<i64>,
        /// Webhook URL or email address for the expiry notice
        #[arg(short, long)]
        target: Option<String>,
        /// Creation time (RFC 3339); defaults to now
        #[arg(long)]
        created_at: Option<DateTime<Utc>>,
        /// Provisioning locator entry, repeatable
        #[arg(short, long, value_parser = parse_key_value)]
        locator: Vec<(String, String)>,
    },
    /// Stop tracking a resource without destroying it
    Deregister {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Compute a schedule locally without contacting the controller.
    ///
    /// Without --lead-hours the built-in 1h lead is assumed; a controller
    /// configured with a different default lead will schedule the notice
    /// differently.
    Preview {
        #[arg(long, allow_negative_numbers = true)]
        ttl_hours: i64,
        /// Hours of advance notice (defaults to 1h, not the controller's setting)
        #[arg(long, allow_negative_numbers = true)]
        lead_hours: Option<i64>,
        #[arg(long)]
        created_at: Option<DateTime<Utc>>,
    },
}

#[derive(Tabled)]
struct ResourceRow {
    id: String,
    state: String,
    destroy_at: String,
    remaining: String,
    notified: String,
    target: String,
}

impl ResourceRow {
    fn new(status: &ResourceStatus, now: DateTime<Utc>) -> Self {
        let record = &status.record;
        Self {
            id: record.resource_id.clone(),
            state: colorize_state(status.state),
            destroy_at: output::format_time(record.destroy_at),
            remaining: if record.destroyed {
                "-".to_string()
            } else {
                output::format_relative(record.destroy_at, now)
            },
            notified: if record.notified { "yes" } else { "no" }.to_string(),
            target: record
                .notification_target
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn colorize_state(state: LifecycleState) -> String {
    let text = state.to_string();
    match state {
        LifecycleState::PendingNotify => text.normal().to_string(),
        LifecycleState::Notified => text.cyan().to_string(),
        LifecycleState::PendingDestroy => text.yellow().to_string(),
        LifecycleState::Destroyed => text.dimmed().to_string(),
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[derive(Serialize)]
struct Preview {
    created_at: DateTime<Utc>,
    destroy_at: DateTime<Utc>,
    notify_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

fn preview(ttl_hours: i64, lead_hours: Option<i64>, created_at: DateTime<Utc>) -> Result<Option<Preview>> {
    if ttl_hours <= 0 {
        return Ok(None);
    }

    let ttl = hours(ttl_hours)?;
    let lead = match lead_hours {
        Some(h) => hours(h)?,
        None => chrono::Duration::seconds(DEFAULT_NOTIFY_LEAD_SECS),
    };
    let schedule = compute_schedule(created_at, ttl, lead)?;

    Ok(Some(Preview {
        created_at,
        destroy_at: schedule.destroy_at,
        notify_at: schedule.notify_at,
        warning: schedule.warning.map(|w| w.to_string()),
    }))
}

pub async fn handle_resource_command(
    command: ResourceCommands,
    api: &ApiClient,
    format: OutputFormat,
) -> Result<()> {
    match command {
        ResourceCommands::List { pending } => {
            let path = if pending {
                "/api/resources?pending=true"
            } else {
                "/api/resources"
            };
            let resources: Vec<ResourceStatus> = api.get(path).await?;
            let now = Utc::now();
            output::print_output(&resources, |r| ResourceRow::new(r, now), format)?;
        }

        ResourceCommands::Show { id } => {
            let status: ResourceStatus = api.get(&ApiClient::resource_path(&id)).await?;

            if format != OutputFormat::Table {
                return output::print_single(&status, format);
            }

            let record = &status.record;
            let now = Utc::now();
            println!("Resource {}", record.resource_id.bold());
            println!("  State:       {}", colorize_state(status.state));
            println!("  Created:     {}", output::format_time(record.created_at));
            println!(
                "  Notify at:   {} ({})",
                output::format_time(record.notify_at),
                output::format_relative(record.notify_at, now)
            );
            println!(
                "  Destroy at:  {} ({})",
                output::format_time(record.destroy_at),
                output::format_relative(record.destroy_at, now)
            );
            println!(
                "  Target:      {}",
                record.notification_target.as_deref().unwrap_or("-")
            );
            if let Some(at) = record.notified_at {
                println!("  Notified:    {}", output::format_time(at));
            }
            if let Some(at) = record.destroyed_at {
                println!("  Destroyed:   {}", output::format_time(at));
            }
            for (key, value) in &record.locator {
                println!("  {}: {}", key, value);
            }
        }

        ResourceCommands::Register {
            id,
            ttl_hours,
            lead_hours,
            target,
            created_at,
            locator,
        } => {
            let request = ScheduleRequest {
                resource_id: id.clone(),
                created_at,
                ttl_hours,
                notify_lead_hours: lead_hours,
                notification_target: target,
                locator: locator.into_iter().collect::<BTreeMap<_, _>>(),
            };

            let registration: Registration = api.post("/api/resources", &request).await?;

            if format != OutputFormat::Table {
                return output::print_single(&registration, format);
            }

            match &registration.record {
                Some(record) if registration.registered => output::print_success(&format!(
                    "Resource '{}' registered, destroy at {}",
                    id,
                    output::format_time(record.destroy_at)
                )),
                _ => output::print_info(&format!(
                    "TTL is {}h; '{}' will not be destroyed automatically",
                    ttl_hours, id
                )),
            }
            if let Some(warning) = &registration.warning {
                output::print_warning(warning);
            }
        }

        ResourceCommands::Deregister { id, yes } => {
            use dialoguer::Confirm;

            let confirm = yes
                || Confirm::new()
                    .with_prompt(format!(
                        "Stop tracking '{}'? It will no longer be destroyed automatically",
                        id
                    ))
                    .interact()?;

            if confirm {
                api.delete(&ApiClient::resource_path(&id)).await?;
                output::print_success(&format!("Resource '{}' deregistered", id));
            } else {
                output::print_info("Deregistration cancelled");
            }
        }

        ResourceCommands::Preview {
            ttl_hours,
            lead_hours,
            created_at,
        } => {
            let created_at = created_at.unwrap_or_else(Utc::now);
            let lead_defaulted = lead_hours.is_none();
            let preview = preview(ttl_hours, lead_hours, created_at)
                .context("Cannot compute schedule")?;

            match preview {
                None => output::print_info("TTL disabled; the resource would not be tracked"),
                Some(p) if format != OutputFormat::Table => output::print_single(&p, format)?,
                Some(p) => {
                    println!("  Created:     {}", output::format_time(p.created_at));
                    println!("  Notify at:   {}", output::format_time(p.notify_at));
                    println!("  Destroy at:  {}", output::format_time(p.destroy_at));
                    if lead_defaulted {
                        output::print_info(
                            "Lead time assumed to be 1h; the controller may be configured differently",
                        );
                    }
                    if let Some(warning) = &p.warning {
                        output::print_warning(warning);
                    }
                }
            }
        }
    }

    Ok(())
}
