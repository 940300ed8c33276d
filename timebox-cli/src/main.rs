//! timebox CLI
//!
//! Command-line interface for the timebox lifecycle controller

mod api;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::alerts::AlertCommands;
use commands::config::ConfigCommands;
use commands::resource::ResourceCommands;
use commands::tick::TickCommands;
use output::OutputFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Controller address (defaults to the configured server)
    #[arg(short, long, global = true, env = "TIMEBOX_SERVER")]
    server: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register, inspect and deregister time-boxed resources
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },
    /// Run or inspect trigger-loop ticks
    Tick {
        #[command(subcommand)]
        command: TickCommands,
    },
    /// Show escalation alerts
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
    /// Manage local CLI settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            output::print_warning(&format!("Ignoring unreadable CLI config: {}", e));
            config::Config::default()
        }
    };

    let server = cli
        .server
        .clone()
        .unwrap_or_else(|| config.default_server.clone());
    let format = OutputFormat::parse(cli.output.as_deref().unwrap_or(&config.default_output));
    let api_client = api::ApiClient::new(&server, config.token.clone());

    match cli.command {
        Commands::Resource { command } => {
            commands::resource::handle_resource_command(command, &api_client, format).await?
        }
        Commands::Tick { command } => {
            commands::tick::handle_tick_command(command, &api_client, format).await?
        }
        Commands::Alerts { command } => {
            commands::alerts::handle_alert_command(command, &api_client, format).await?
        }
        Commands::Config { command } => {
            commands::config::handle_config_command(command, &mut config, format)?
        }
        Commands::Completions { shell } => {
            generate_completions(shell);
        }
    }

    Ok(())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    generate(shell, &mut cmd, name, &mut io::stdout());
}
