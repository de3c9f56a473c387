//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILPOOL_CONFIG` (environment variable)
//! 2. `~/.config/mailpool/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailpool\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Delivery-log database.
    pub store: StoreConfig,
    /// Container runtime settings.
    pub runtime: RuntimeConfig,
    /// Synthetic mailbox layout inside each container.
    pub mailbox: MailboxConfig,
    /// Campaign (sender side) settings.
    pub campaign: CampaignConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override data directory for the database and logs.
    pub data_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Delivery-log database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; defaults to `<data_dir>/email_logs.db`.
    pub db_path: Option<PathBuf>,
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Mail-server image launched by `create`.
    pub image: String,
    /// SMTP port inside the container, published on an ephemeral host port.
    pub smtp_port: u16,
    /// Default number of log lines returned by `logs`.
    pub log_tail: usize,
    /// Command run inside the container by `send`; `{id}` is replaced by
    /// the container id.
    pub mailer_command: Vec<String>,
}

/// Synthetic mailbox layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Number of synthetic users (`user1..=user_count`).
    pub user_count: u32,
    /// User name prefix.
    pub user_prefix: String,
    /// Mail domain of the synthetic users.
    pub domain: String,
    /// Sender address used by campaigns.
    pub base_email: String,
    /// Directory holding new mail; `{user}` is replaced by the user name.
    pub maildir_new: String,
}

/// Campaign (sender side) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// SMTP relay host.
    pub smtp_host: String,
    /// SMTP relay port.
    pub smtp_port: u16,
    /// Subject prefix; a random 4-digit number is appended per message.
    pub subject_prefix: String,
    /// Remote random-quote endpoint.
    pub quote_url: String,
    /// Timeout for the quote request, in seconds.
    pub quote_timeout_secs: u64,
    /// Base URL of the remote template API (`GET {url}/mails`).
    pub template_api_url: Option<String>,
    /// Container id recorded on delivery rows; defaults to `$HOSTNAME`.
    pub container_id: Option<String>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: "mypostfix".to_string(),
            smtp_port: 25,
            log_tail: 200,
            mailer_command: ["mailpool", "campaign", "--container-id", "{id}"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            user_count: 50,
            user_prefix: "user".to_string(),
            domain: "localhost".to_string(),
            base_email: "base@localhost".to_string(),
            maildir_new: "/home/{user}/Maildir/new".to_string(),
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            subject_prefix: "Automated Test".to_string(),
            quote_url: "https://zenquotes.io/api/random".to_string(),
            quote_timeout_secs: 5,
            template_api_url: None,
            container_id: None,
        }
    }
}

impl MailboxConfig {
    /// User name for index `i` (e.g. `user7`).
    pub fn user_name(&self, i: u32) -> String {
        format!("{}{i}", self.user_prefix)
    }

    /// Full address for index `i` (e.g. `user7@localhost`).
    pub fn address(&self, i: u32) -> String {
        format!("{}@{}", self.user_name(i), self.domain)
    }

    /// New-mail directory for index `i`.
    pub fn maildir_for(&self, i: u32) -> String {
        self.maildir_new.replace("{user}", &self.user_name(i))
    }

    /// Every synthetic recipient address, in index order.
    pub fn all_addresses(&self) -> Vec<String> {
        (1..=self.user_count).map(|i| self.address(i)).collect()
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILPOOL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailpool").join("config.toml"))
}

/// Return the data directory for the database and logs.
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.data_dir {
        return dir.clone();
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailpool")
}

/// Return the delivery-log database path.
pub fn db_path(config: &Config) -> PathBuf {
    config
        .store
        .db_path
        .clone()
        .unwrap_or_else(|| data_dir(config).join("email_logs.db"))
}
