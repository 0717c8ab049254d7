//! Configuration loading.
//!
//! Loads a TOML file with `${VAR}` environment variable substitution and
//! validates it before any worker starts. Every validation failure is fatal.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [telegram]
//! token = "${TELEGRAM_TOKEN}"
//! chat_ids = [12345678, -1001234567890]
//!
//! [tvdb]
//! api_key = "${TVDB_API_KEY}"
//!
//! [pipeline]
//! backoff_max_ms = 60000
//! ```

use crate::delivery::{ChatSender, LogSender, RecipientId, TelegramSender};
use crate::provider::{MetadataProvider, TvdbClient};
use crate::retry::BackoffPolicy;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "TVHERALD_CONFIG";

/// Used when [`CONFIG_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/tvherald.toml";

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HeraldConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub tvdb: TvdbConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Telegram delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,

    /// Recipients, in delivery order
    #[serde(default)]
    pub chat_ids: Vec<RecipientId>,

    #[serde(default = "default_telegram_url")]
    pub api_url: String,

    /// "Markdown", "MarkdownV2" or "HTML"; plain text when unset
    #[serde(default)]
    pub parse_mode: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Log messages instead of sending them
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            chat_ids: Vec::new(),
            api_url: default_telegram_url(),
            parse_mode: None,
            timeout_ms: default_timeout_ms(),
            dry_run: false,
        }
    }
}

fn default_telegram_url() -> String {
    crate::delivery::telegram::DEFAULT_API_URL.to_string()
}

/// TheTVDB configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TvdbConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub pin: Option<String>,

    #[serde(default = "default_tvdb_url")]
    pub api_url: String,

    /// Three-letter language code for overviews, e.g. "eng"
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TvdbConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            pin: None,
            api_url: default_tvdb_url(),
            language: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_tvdb_url() -> String {
    crate::provider::tvdb::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_ms() -> u64 {
    30000
}

/// Worker loop tuning
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_backoff_first_ms")]
    pub backoff_first_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backoff_first_ms: default_backoff_first_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_backoff_first_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl HeraldConfig {
    /// Load configuration from the default path or TVHERALD_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            recipients = config.telegram.chat_ids.len(),
            dry_run = config.telegram.dry_run,
            port = config.server.port,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Substitute, parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content);

        debug!("Parsing TOML configuration");
        let config: HeraldConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }

        if !self.telegram.dry_run {
            require_credential("telegram.token", &self.telegram.token)?;
        }
        if self.telegram.chat_ids.is_empty() {
            return Err(ConfigError::MissingField("telegram.chat_ids".to_string()));
        }
        require_http_url("telegram.api_url", &self.telegram.api_url)?;

        require_credential("tvdb.api_key", &self.tvdb.api_key)?;
        if let Some(pin) = &self.tvdb.pin {
            require_credential("tvdb.pin", pin)?;
        }
        require_http_url("tvdb.api_url", &self.tvdb.api_url)?;

        let pipeline = &self.pipeline;
        if pipeline.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if pipeline.backoff_factor.is_nan() || pipeline.backoff_factor < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.backoff_factor must be at least 1.0, got {}",
                pipeline.backoff_factor
            )));
        }
        if pipeline.backoff_first_ms > pipeline.backoff_max_ms {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.backoff_first_ms ({}) exceeds backoff_max_ms ({})",
                pipeline.backoff_first_ms, pipeline.backoff_max_ms
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pipeline.poll_interval_ms)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(self.pipeline.backoff_first_ms),
            max: Duration::from_millis(self.pipeline.backoff_max_ms),
            factor: self.pipeline.backoff_factor,
        }
    }

    /// Recipients in delivery order
    pub fn recipients(&self) -> Arc<[RecipientId]> {
        self.telegram.chat_ids.as_slice().into()
    }

    /// Build the metadata provider from the `[tvdb]` section.
    pub fn build_provider(&self) -> Arc<dyn MetadataProvider> {
        let tvdb = &self.tvdb;
        let mut client = TvdbClient::new(&tvdb.api_key)
            .with_base_url(&tvdb.api_url)
            .with_timeout(Duration::from_millis(tvdb.timeout_ms));

        if let Some(pin) = &tvdb.pin {
            client = client.with_pin(pin);
        }
        if let Some(language) = &tvdb.language {
            client = client.with_language(language);
        }

        Arc::new(client)
    }

    /// Build the chat sender from the `[telegram]` section.
    ///
    /// Returns a [`LogSender`] when `dry_run` is set.
    pub fn build_sender(&self) -> Arc<dyn ChatSender> {
        let telegram = &self.telegram;
        if telegram.dry_run {
            info!("Telegram dry run enabled, messages will only be logged");
            return Arc::new(LogSender::new());
        }

        let mut sender = TelegramSender::new(&telegram.token)
            .with_api_url(&telegram.api_url)
            .with_timeout(Duration::from_millis(telegram.timeout_ms));

        if let Some(mode) = &telegram.parse_mode {
            sender = sender.with_parse_mode(mode);
        }

        Arc::new(sender)
    }
}

fn require_credential(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(name.to_string()));
    }
    if ENV_PLACEHOLDER.is_match(value) {
        return Err(ConfigError::ValidationError(format!(
            "{} contains an unsubstituted environment variable",
            name
        )));
    }
    Ok(())
}

fn require_http_url(name: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::ValidationError(format!(
            "{} must start with http:// or https://",
            name
        )));
    }
    Ok(())
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
