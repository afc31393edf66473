use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides `provider.api_key`
pub const API_KEY_ENV: &str = "API_KEY_OPENWEATHERMAP";

/// Default OpenWeatherMap current-weather endpoint
pub const DEFAULT_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a one-line message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Weather provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retry policy for transient provider failures
    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-task execution limits
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Where task status and result objects live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Static lookup table locations
    #[serde(default)]
    pub tables: TablesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Current-weather endpoint
    pub api_url: String,

    /// Provider credential (can be set via `API_KEY_OPENWEATHERMAP`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Unit system passed to the provider
    pub units: String,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            units: "metric".to_string(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of retry attempts (0 disables retries)
    pub max_retries: u32,

    /// Initial backoff delay, doubled on every attempt
    pub initial_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TasksConfig {
    /// Cap on in-flight fetches per task; unbounded when unset
    #[serde(default)]
    pub max_concurrent_fetches: Option<usize>,

    /// Fail the whole task if a single fetch exceeds this many seconds
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for per-region result objects
    pub data_dir: PathBuf,

    /// SQLite database holding task status
    pub status_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            data_dir: base.join("weather_data"),
            status_db: base.join("tasks.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Typo corrections (raw title-cased name -> corrected name)
    pub typos: PathBuf,

    /// City aliases (corrected name -> canonical name)
    pub aliases: PathBuf,

    /// Region membership (region -> list of canonical names)
    pub regions: PathBuf,
}

impl Default for TablesConfig {
    fn default() -> Self {
        let base = default_config_dir();
        Self {
            typos: base.join("typos.json"),
            aliases: base.join("city_mappings.json"),
            regions: base.join("regions.json"),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("citycast")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("citycast")
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let mut config = Self::default();
            config.save_to(&config_path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// The environment credential wins over whatever the file says
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.provider.api_key = Some(key);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.provider.api_url, "provider.api_url", &mut result);

        match self.provider.api_key.as_deref() {
            None | Some("") => result.add_warning(
                "provider.api_key",
                format!("No API key configured; set {} or provider.api_key", API_KEY_ENV),
            ),
            Some(_) => {}
        }

        if self.provider.units.trim().is_empty() {
            result.add_error("provider.units", "Unit system cannot be empty");
        }

        if self.provider.request_timeout_secs == 0 {
            result.add_error(
                "provider.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.provider.request_timeout_secs > 300 {
            result.add_warning(
                "provider.request_timeout_secs",
                "Request timeout is unusually long (>300s)",
            );
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            result.add_error(
                "retry.initial_delay_ms",
                "Initial delay cannot exceed retry.max_delay_ms",
            );
        }

        if self.retry.max_retries > 10 {
            result.add_warning("retry.max_retries", "More than 10 retries per request");
        }

        if self.tasks.max_concurrent_fetches == Some(0) {
            result.add_error(
                "tasks.max_concurrent_fetches",
                "Concurrency cap must be greater than 0 (omit it for unbounded)",
            );
        }

        if self.tasks.fetch_timeout_secs == Some(0) {
            result.add_error(
                "tasks.fetch_timeout_secs",
                "Fetch timeout must be greater than 0 (omit it to disable)",
            );
        }

        for (field, path) in [
            ("tables.typos", &self.tables.typos),
            ("tables.aliases", &self.tables.aliases),
            ("tables.regions", &self.tables.regions),
        ] {
            if !path.exists() {
                result.add_warning(field, format!("File does not exist: {}", path.display()));
            }
        }

        if self.storage.data_dir.exists() && !self.storage.data_dir.is_dir() {
            result.add_error(
                "storage.data_dir",
                format!(
                    "Path is not a directory: {}",
                    self.storage.data_dir.display()
                ),
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the default configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("citycast");

        Ok(config_dir.join("config.toml"))
    }
}
