//! Trigger-loop commands

use crate::api::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use timebox_common::TickReport;

#[derive(Subcommand)]
pub enum TickCommands {
    /// Run one tick now instead of waiting for the next interval
    Run,
    /// Show the report of the most recent tick
    Last,
}

fn print_report(report: &TickReport) {
    if let (Some(started), Some(finished)) = (report.started_at, report.finished_at) {
        println!(
            "Tick at {} ({} ms)",
            output::format_time(started),
            (finished - started).num_milliseconds()
        );
    }
    println!("  Evaluated:  {}", report.evaluated);
    println!("  Notified:   {}", report.notified);
    println!("  Destroyed:  {}", report.destroyed);
    println!("  Purged:     {}", report.purged);

    let failures = report.notify_failures + report.destroy_failures;
    if failures > 0 {
        println!(
            "  {}",
            format!(
                "Failures:   {} notify, {} destroy",
                report.notify_failures, report.destroy_failures
            )
            .red()
        );
    }
}

pub async fn handle_tick_command(command: TickCommands, api: &ApiClient, format: OutputFormat) -> Result<()> {
    match command {
        TickCommands::Run => {
            use indicatif::{ProgressBar, ProgressStyle};
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
            spinner.set_message("Running tick...");
            spinner.enable_steady_tick(std::time::Duration::from_millis(100));

            let result: Result<TickReport> = api.post_empty("/api/tick").await;
            spinner.finish_and_clear();
            let report = result?;

            if format == OutputFormat::Table {
                print_report(&report);
            } else {
                output::print_single(&report, format)?;
            }
        }

        TickCommands::Last => {
            let report: Option<TickReport> = api.get("/api/tick/last").await?;

            match report {
                None => output::print_info("No tick has completed yet"),
                Some(report) if format == OutputFormat::Table => print_report(&report),
                Some(report) => output::print_single(&report, format)?,
            }
        }
    }

    Ok(())
}
