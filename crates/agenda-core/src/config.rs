use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

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

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding config.toml and the default database
    pub config_dir: PathBuf,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Google OAuth and Calendar API settings
    #[serde(default)]
    pub google: GoogleConfig,

    /// Export and reminder settings shared by sync and .ics generation
    #[serde(default)]
    pub calendar: CalendarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. Relative paths resolve against `config_dir`.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("agenda.db"),
        }
    }
}

/// Google OAuth client and endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client id (env: GOOGLE_CLIENT_ID)
    pub client_id: String,
    /// OAuth client secret (env: GOOGLE_CLIENT_SECRET)
    pub client_secret: String,
    /// Callback URL registered with Google (env: GOOGLE_REDIRECT_URI)
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_redirect_uri() -> String {
    "http://localhost:3002/api/calendar/google/callback".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/calendar".to_string()]
}

impl GoogleConfig {
    /// Check if credentials are configured (not placeholders)
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.client_id.starts_with("YOUR_")
            && !self.client_secret.starts_with("YOUR_")
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: "YOUR_GOOGLE_CLIENT_ID".to_string(),
            client_secret: "YOUR_GOOGLE_CLIENT_SECRET".to_string(),
            redirect_uri: default_redirect_uri(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            scopes: default_scopes(),
        }
    }
}

/// Fixed-offset clinic time zone. The clinic's region observes no DST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeZoneConfig {
    /// IANA identifier written as TZID
    pub tzid: String,
    /// Offset from UTC in minutes (e.g. -180 for UTC-03:00)
    pub utc_offset_minutes: i32,
    /// Short name written as TZNAME
    pub abbreviation: String,
}

impl Default for TimeZoneConfig {
    fn default() -> Self {
        Self {
            tzid: "America/Sao_Paulo".to_string(),
            utc_offset_minutes: -180,
            abbreviation: "BRT".to_string(),
        }
    }
}

/// One reminder, used both as a Google reminder override and as a VALARM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderConfig {
    /// Google reminder method ("email" or "popup")
    pub method: String,
    /// Minutes before the event start
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub time_zone: TimeZoneConfig,
    #[serde(default = "default_reminders")]
    pub reminders: Vec<ReminderConfig>,
    /// Timeout for gateway and token endpoint calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_product_id")]
    pub product_id: String,
    #[serde(default = "default_calendar_name")]
    pub calendar_name: String,
    /// Suffix for event UIDs, `appointment-<id>@<uid_domain>`
    #[serde(default = "default_uid_domain")]
    pub uid_domain: String,
}

fn default_reminders() -> Vec<ReminderConfig> {
    vec![
        ReminderConfig {
            method: "email".to_string(),
            minutes: 24 * 60,
        },
        ReminderConfig {
            method: "popup".to_string(),
            minutes: 60,
        },
    ]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_product_id() -> String {
    "-//Agenda//Clinic Scheduling//EN".to_string()
}

fn default_calendar_name() -> String {
    "Clinic Appointments".to_string()
}

fn default_uid_domain() -> String {
    "agenda.local".to_string()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            time_zone: TimeZoneConfig::default(),
            reminders: default_reminders(),
            request_timeout_secs: default_request_timeout_secs(),
            product_id: default_product_id(),
            calendar_name: default_calendar_name(),
            uid_domain: default_uid_domain(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            database: DatabaseConfig::default(),
            google: GoogleConfig::default(),
            calendar: CalendarConfig::default(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agenda")
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_dir().join("config.toml"))
    }

    /// Load configuration from `path`, writing defaults there if the file is missing.
    /// Google credentials in the environment take precedence over the file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let mut config = Self::default();
            if let Some(parent) = path.parent() {
                config.config_dir = parent.to_path_buf();
            }
            config.save_to(path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("GOOGLE_CLIENT_ID") {
            self.google.client_id = id;
        }
        if let Ok(secret) = std::env::var("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = secret;
        }
        if let Ok(uri) = std::env::var("GOOGLE_REDIRECT_URI") {
            self.google.redirect_uri = uri;
        }
    }

    /// Absolute path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.config_dir.join(&self.database.path)
        }
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.google.redirect_uri, "google.redirect_uri", &mut result);
        self.validate_url(&self.google.auth_url, "google.auth_url", &mut result);
        self.validate_url(&self.google.token_url, "google.token_url", &mut result);
        self.validate_url(&self.google.api_base_url, "google.api_base_url", &mut result);

        if !self.google.is_configured() {
            result.add_warning(
                "google",
                "Google OAuth not configured - calendar sync will be unavailable",
            );
        }
        if self.google.scopes.is_empty() {
            result.add_error("google.scopes", "At least one OAuth scope is required");
        }

        let tz = &self.calendar.time_zone;
        if tz.tzid.trim().is_empty() {
            result.add_error("calendar.time_zone.tzid", "Time zone id must not be empty");
        }
        if tz.utc_offset_minutes.abs() >= 24 * 60 {
            result.add_error(
                "calendar.time_zone.utc_offset_minutes",
                "UTC offset must be less than 24 hours",
            );
        }

        if self.calendar.request_timeout_secs == 0 {
            result.add_error(
                "calendar.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        } else if self.calendar.request_timeout_secs > 300 {
            result.add_warning(
                "calendar.request_timeout_secs",
                "Request timeout is unusually long (>300s)",
            );
        }

        if self.calendar.reminders.is_empty() {
            result.add_warning("calendar.reminders", "No reminders configured");
        }
        for reminder in &self.calendar.reminders {
            if reminder.method != "email" && reminder.method != "popup" {
                result.add_error(
                    "calendar.reminders",
                    format!("Unknown reminder method: {}", reminder.method),
                );
            }
        }

        if self.calendar.uid_domain.trim().is_empty() {
            result.add_error("calendar.uid_domain", "UID domain must not be empty");
        }

        result
    }

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
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }
}
