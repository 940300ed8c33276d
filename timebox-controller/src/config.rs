//! Configuration management for the timebox controller
//!
//! Settings are layered:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeboxConfig {
    /// HTTP API configuration
    pub server: ServerConfig,
    /// Lifecycle state store
    pub database: DatabaseConfig,
    /// Trigger loop and retry behaviour
    pub controller: ControllerConfig,
    /// Expiry notices and alert delivery
    pub notifier: NotifierConfig,
    /// How destroy calls and label writes reach the provisioning system
    pub provisioner: ProvisionerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Bearer token required on every non-health endpoint, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:///var/lib/timebox/timebox.db` or `memory://`
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Trigger loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between two ticks of the trigger loop
    pub tick_interval_secs: u64,
    /// Upper bound on a single notify or destroy call
    pub call_timeout_secs: u64,
    /// Lead time used when a registration does not specify one
    pub default_notify_lead_secs: i64,
    /// Consecutive failed ticks before a transient failure is escalated
    pub escalation_threshold: u32,
    /// How long destroyed records are kept for operators before purging
    pub destroyed_retention_hours: i64,
    /// Run one tick immediately at startup instead of waiting a full interval
    pub tick_on_startup: bool,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Timeout for a single webhook request
    pub webhook_timeout_secs: u64,
    /// Extra headers sent with every webhook notice
    pub webhook_headers: Vec<(String, String)>,
    /// Where escalated alerts are posted, if anywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,
    /// SMTP relay for `mailto:` targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
}

/// SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

/// Provisioning system adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProvisionerConfig {
    /// REST endpoint exposing `DELETE /resources/{id}`
    Http(HttpProvisionerConfig),
    /// External command such as `terraform destroy`
    Command(CommandProvisionerConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProvisionerConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandProvisionerConfig {
    /// argv of the destroy command; `{resource_id}` and `{locator.<key>}` are substituted
    pub destroy_command: Vec<String>,
    /// argv of the label command; additionally substitutes `{labels}` as `k=v,k=v`
    #[serde(default)]
    pub label_command: Vec<String>,
    /// Output fragments meaning the resource no longer exists
    #[serde(default)]
    pub not_found_markers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Enable file logging
    pub file_logging_enabled: bool,
    /// Emit console logs as JSON
    pub json_format: bool,
    /// Rotation of the log file
    pub rotation: LogRotation,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8086,
            api_token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/timebox/timebox.db".to_string(),
            max_connections: 4,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3600,
            call_timeout_secs: 320,
            default_notify_lead_secs: timebox_common::DEFAULT_NOTIFY_LEAD_SECS,
            escalation_threshold: 3,
            destroyed_retention_hours: 24 * 7,
            tick_on_startup: true,
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_timeout_secs: 30,
            webhook_headers: Vec::new(),
            alert_webhook_url: None,
            smtp: None,
        }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        ProvisionerConfig::Http(HttpProvisionerConfig {
            base_url: "http://localhost:8080/api".to_string(),
            token: None,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/timebox"),
            file_logging_enabled: true,
            json_format: false,
            rotation: LogRotation::Daily,
        }
    }
}

impl ControllerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl TimeboxConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("TIMEBOX_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/timebox/config.toml")),
            Some(PathBuf::from("./timebox.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("TIMEBOX_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TIMEBOX_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(token) = lookup("TIMEBOX_API_TOKEN") {
            self.server.api_token = Some(token).filter(|t| !t.is_empty());
        }

        // Database
        if let Some(url) = lookup("TIMEBOX_DATABASE_URL") {
            self.database.url = url;
        }

        // Controller
        if let Some(secs) = lookup("TIMEBOX_TICK_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.controller.tick_interval_secs = secs;
        }
        if let Some(secs) = lookup("TIMEBOX_CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.controller.call_timeout_secs = secs;
        }
        if let Some(n) = lookup("TIMEBOX_ESCALATION_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.controller.escalation_threshold = n;
        }

        // Notifier
        if let Some(url) = lookup("TIMEBOX_ALERT_WEBHOOK_URL") {
            self.notifier.alert_webhook_url = Some(url).filter(|u| !u.is_empty());
        }

        // Provisioner
        if let ProvisionerConfig::Http(ref mut http) = self.provisioner {
            if let Some(url) = lookup("TIMEBOX_PROVISIONER_URL") {
                http.base_url = url;
            }
            if let Some(token) = lookup("TIMEBOX_PROVISIONER_TOKEN") {
                http.token = Some(token).filter(|t| !t.is_empty());
            }
        }

        // Logging
        if let Some(level) = lookup("TIMEBOX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(path) = lookup("TIMEBOX_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(path);
        }
        if let Some(enabled) = lookup("TIMEBOX_FILE_LOGGING") {
            self.logging.file_logging_enabled = enabled.parse().unwrap_or(true);
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(ConfigError::Validation("Database URL cannot be empty".to_string()));
        }

        if self.controller.tick_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Tick interval must be at least one second".to_string(),
            ));
        }

        if self.controller.call_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Call timeout must be at least one second".to_string(),
            ));
        }

        if self.controller.default_notify_lead_secs < 0 {
            return Err(ConfigError::Validation(
                "Default notify lead time cannot be negative".to_string(),
            ));
        }

        if self.controller.destroyed_retention_hours < 0 {
            return Err(ConfigError::Validation(
                "Destroyed record retention cannot be negative".to_string(),
            ));
        }

        if let Some(ref url) = self.notifier.alert_webhook_url {
            url::Url::parse(url)
                .map_err(|e| ConfigError::Validation(format!("Invalid alert webhook URL: {}", e)))?;
        }

        match &self.provisioner {
            ProvisionerConfig::Http(http) => {
                url::Url::parse(&http.base_url).map_err(|e| {
                    ConfigError::Validation(format!("Invalid provisioner URL: {}", e))
                })?;
            }
            ProvisionerConfig::Command(cmd) => {
                if cmd.destroy_command.is_empty() {
                    return Err(ConfigError::Validation(
                        "Provisioner destroy_command cannot be empty".to_string(),
                    ));
                }
                if !cmd.destroy_command.iter().any(|arg| arg.contains("{resource_id}")) {
                    return Err(ConfigError::Validation(
                        "Provisioner destroy_command must contain {resource_id} placeholder"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = TimeboxConfig::default();
        assert_eq!(config.server.port, 8086);
        assert_eq!(config.controller.tick_interval_secs, 3600);
        assert_eq!(config.controller.call_timeout_secs, 320);
        assert_eq!(config.controller.default_notify_lead_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = TimeboxConfig::default();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = TimeboxConfig::default();
        invalid.controller.tick_interval_secs = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = TimeboxConfig::default();
        invalid.controller.destroyed_retention_hours = -1;
        assert!(invalid.validate().is_err());

        let mut purge_at_once = TimeboxConfig::default();
        purge_at_once.controller.destroyed_retention_hours = 0;
        assert!(purge_at_once.validate().is_ok());

        let mut invalid = TimeboxConfig::default();
        invalid.provisioner = ProvisionerConfig::Command(CommandProvisionerConfig {
            destroy_command: vec!["terraform".into(), "destroy".into()],
            label_command: vec![],
            not_found_markers: vec![],
            working_dir: None,
        });
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_generate_sample_config() {
        let sample = TimeboxConfig::generate_sample();
        assert!(sample.contains("[server]"));
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[controller]"));
        assert!(sample.contains("[notifier]"));
        assert!(sample.contains("[provisioner]"));
        assert!(sample.contains("[logging]"));

        let parsed: TimeboxConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.controller.call_timeout_secs, 320);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: TimeboxConfig = toml::from_str(
            r#"
            [controller]
            tick_interval_secs = 600

            [provisioner]
            kind = "command"
            destroy_command = ["terraform", "destroy", "-auto-approve", "-var", "cluster={resource_id}"]
            not_found_markers = ["not found"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.controller.tick_interval_secs, 600);
        assert_eq!(parsed.controller.call_timeout_secs, 320);
        assert_eq!(parsed.server.port, 8086);
        assert!(matches!(parsed.provisioner, ProvisionerConfig::Command(_)));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TIMEBOX_PORT", "9000"),
            ("TIMEBOX_DATABASE_URL", "memory://"),
            ("TIMEBOX_TICK_INTERVAL_SECS", "60"),
            ("TIMEBOX_PROVISIONER_URL", "https://infra.example.com/api"),
            ("TIMEBOX_API_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let mut config = TimeboxConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url, "memory://");
        assert_eq!(config.controller.tick_interval_secs, 60);
        assert!(config.server.api_token.is_none());
        match config.provisioner {
            ProvisionerConfig::Http(http) => {
                assert_eq!(http.base_url, "https://infra.example.com/api")
            }
            _ => panic!("expected http provisioner"),
        }
    }
}
