//! Local CLI settings

use crate::config::Config;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current settings
    Show,
    /// Set the default controller address
    SetServer { url: String },
    /// Store the API token (prompted when omitted)
    SetToken { token: Option<String> },
    /// Forget the stored API token
    ClearToken,
}

/// Settings with the token masked
fn redacted(config: &Config) -> Config {
    Config {
        token: config.token.as_ref().map(|_| "********".to_string()),
        ..config.clone()
    }
}

pub fn handle_config_command(command: ConfigCommands, config: &mut Config, format: OutputFormat) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            if format == OutputFormat::Table {
                println!("Config file: {}", Config::config_path()?.display());
            }
            output::print_single(&redacted(config), format)?;
        }

        ConfigCommands::SetServer { url } => {
            reqwest::Url::parse(&url)?;
            config.default_server = url.clone();
            config.save()?;
            output::print_success(&format!("Default server set to {}", url));
        }

        ConfigCommands::SetToken { token } => {
            let token = match token {
                Some(t) => t,
                None => dialoguer::Password::new().with_prompt("API token").interact()?,
            };
            config.token = Some(token);
            config.save()?;
            output::print_success("API token saved");
        }

        ConfigCommands::ClearToken => {
            config.token = None;
            config.save()?;
            output::print_success("API token cleared");
        }
    }

    Ok(())
}
