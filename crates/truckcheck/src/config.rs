//! Configuration management for truckcheck.
//!
//! Configuration is layered with figment: built-in defaults, then an optional
//! TOML file, then `TRUCKCHECK_` environment variables. Nested keys use a
//! double underscore, e.g. `TRUCKCHECK_EMAIL__PASSWORD`.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::delivery::email::RetryPolicy;
use crate::error::{Error, Result};
use crate::location::ResolverSettings;
use crate::orchestrator::SaveTimeouts;
use crate::sweep::SweepSettings;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "truckcheck";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "checklists.db";

/// Default directory name for rendered documents.
const DOCUMENTS_DIR_NAME: &str = "documents";

/// The host scheduler never runs periodic work more often than this.
pub const MIN_SWEEP_INTERVAL_MINUTES: u64 = 15;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local record store.
    pub storage: StorageConfig,
    /// Location resolution.
    pub location: LocationConfig,
    /// Document rendering.
    pub render: RenderConfig,
    /// Outbound email.
    pub email: EmailConfig,
    /// Remote analytics backend.
    pub remote: RemoteConfig,
    /// Save pipeline deadlines.
    pub save: SaveConfig,
    /// Background sweeps.
    pub sweep: SweepConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/truckcheck/checklists.db`
    pub database_path: Option<PathBuf>,
    /// Submissions that never got a document are purged after this many days.
    pub retention_days: u32,
    /// Maximum rows fetched per pending-work query.
    pub pending_batch_limit: usize,
}

/// Location-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Whether the host granted location access.
    pub permission_granted: bool,
    /// Fixed latitude reported by the host, if any.
    pub latitude: Option<f64>,
    /// Fixed longitude reported by the host, if any.
    pub longitude: Option<f64>,
    /// Reverse-geocoding endpoint (Nominatim-compatible).
    pub geocoder_url: Option<String>,
    /// A last-known fix younger than this is used directly.
    pub freshness_secs: u64,
    /// Overall budget of one resolution.
    pub resolve_timeout_secs: u64,
    /// Budget for one reverse-geocoding call.
    pub geocode_timeout_secs: u64,
    /// Budget for the satellite-only fallback.
    pub gps_only_timeout_secs: u64,
}

/// Rendering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Where documents are written.
    /// Defaults to `~/.local/share/truckcheck/documents`
    pub output_dir: Option<PathBuf>,
    /// Directory holding the TTF font family.
    pub fonts_dir: PathBuf,
    /// Font family name (files `<family>-Regular.ttf` etc.).
    pub font_family: String,
}

/// Email configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// SMTP relay host.
    pub smtp_host: String,
    /// SMTP port (implicit TLS).
    pub smtp_port: u16,
    /// SMTP user name.
    pub username: Option<String>,
    /// SMTP password. Supply through the environment.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Sender address.
    pub from: String,
    /// Attempts per delivery.
    pub max_attempts: u32,
    /// Backoff grows by this step after each failed attempt.
    pub backoff_step_ms: u64,
    /// Budget for a single attempt.
    pub attempt_timeout_secs: u64,
    /// Budget for all attempts together.
    pub total_timeout_secs: u64,
}

/// Remote analytics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the document API. Remote sync is off when unset.
    pub endpoint: Option<String>,
    /// Bearer token.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Company the submissions belong to.
    pub company_id: String,
    /// Budget for one upsert.
    pub timeout_secs: u64,
}

/// Save pipeline deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Hard ceiling for the whole save.
    pub global_timeout_secs: u64,
    /// Budget for just-in-time location resolution.
    pub location_timeout_secs: u64,
    /// Budget for document rendering.
    pub render_timeout_secs: u64,
    /// How long the save waits on the email attempt.
    pub email_wait_secs: u64,
    /// How long a one-shot CLI save lingers on detached delivery before exiting.
    pub settle_timeout_secs: u64,
}

/// Background sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Periodic sweep interval; never below 15 minutes.
    pub interval_minutes: u64,
    /// Redeliveries run concurrently in chunks of this size.
    pub chunk_size: usize,
    /// Budget for one redelivery.
    pub item_timeout_secs: u64,
    /// Whether pending emails are retried automatically.
    pub auto_resend: bool,
    /// Recent submissions pushed to the remote backend when connectivity returns.
    pub remote_resync_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_days: 7,
            pending_batch_limit: 10,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            permission_granted: true,
            latitude: None,
            longitude: None,
            geocoder_url: None,
            freshness_secs: 5 * 60,
            resolve_timeout_secs: 10,
            geocode_timeout_secs: 3,
            gps_only_timeout_secs: 5,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            fonts_dir: PathBuf::from("./fonts"),
            font_family: "LiberationSans".to_string(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtppro.zoho.com".to_string(),
            smtp_port: 465,
            username: None,
            password: None,
            from: "checklist@paranalog.com.br".to_string(),
            max_attempts: 3,
            backoff_step_ms: 2000,
            attempt_timeout_secs: 25,
            total_timeout_secs: 30,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            company_id: "paranalog_001".to_string(),
            timeout_secs: 3,
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            global_timeout_secs: 20,
            location_timeout_secs: 5,
            render_timeout_secs: 8,
            email_wait_secs: 3,
            settle_timeout_secs: 15,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_minutes: MIN_SWEEP_INTERVAL_MINUTES,
            chunk_size: 3,
            item_timeout_secs: 30,
            auto_resend: true,
            remote_resync_count: 3,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("TRUCKCHECK_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::ConfigValidation { message });

        if self.email.max_attempts == 0 {
            return invalid("email.max_attempts must be greater than 0".to_string());
        }
        if self.email.attempt_timeout_secs == 0 || self.email.total_timeout_secs == 0 {
            return invalid("email timeouts must be greater than 0".to_string());
        }
        if self.sweep.chunk_size == 0 {
            return invalid("sweep.chunk_size must be greater than 0".to_string());
        }
        if self.storage.pending_batch_limit == 0 {
            return invalid("storage.pending_batch_limit must be greater than 0".to_string());
        }
        if self.save.global_timeout_secs == 0 {
            return invalid("save.global_timeout_secs must be greater than 0".to_string());
        }
        let inner = [
            ("location_timeout_secs", self.save.location_timeout_secs),
            ("render_timeout_secs", self.save.render_timeout_secs),
            ("email_wait_secs", self.save.email_wait_secs),
        ];
        for (name, secs) in inner {
            if secs > self.save.global_timeout_secs {
                return invalid(format!(
                    "save.{name} ({secs}) cannot exceed save.global_timeout_secs ({})",
                    self.save.global_timeout_secs
                ));
            }
        }
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return invalid("location.latitude and location.longitude must be set together".to_string());
        }
        if let Some(lat) = self.location.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return invalid(format!("location.latitude out of range: {lat}"));
            }
        }
        if let Some(lng) = self.location.longitude {
            if !(-180.0..=180.0).contains(&lng) {
                return invalid(format!("location.longitude out of range: {lng}"));
            }
        }
        if self.email.from.parse::<lettre::message::Mailbox>().is_err() {
            return invalid(format!("email.from is not a valid address: {}", self.email.from));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the document output directory, resolving defaults if not set.
    #[must_use]
    pub fn documents_dir(&self) -> PathBuf {
        self.render
            .output_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DOCUMENTS_DIR_NAME))
    }

    /// Whether remote sync is configured.
    #[must_use]
    pub fn remote_enabled(&self) -> bool {
        self.remote.endpoint.is_some()
    }

    /// Retention window for abandoned submissions.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.storage.retention_days))
    }

    /// Periodic sweep interval, clamped to the scheduler minimum.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        let minutes = self.sweep.interval_minutes.max(MIN_SWEEP_INTERVAL_MINUTES);
        Duration::from_secs(minutes * 60)
    }

    /// Budget for one remote upsert.
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    /// Save pipeline deadlines.
    #[must_use]
    pub fn save_timeouts(&self) -> SaveTimeouts {
        SaveTimeouts {
            global: Duration::from_secs(self.save.global_timeout_secs),
            location: Duration::from_secs(self.save.location_timeout_secs),
            render: Duration::from_secs(self.save.render_timeout_secs),
            email_wait: Duration::from_secs(self.save.email_wait_secs),
        }
    }

    /// Time a one-shot save waits for detached delivery before the process exits.
    #[must_use]
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.save.settle_timeout_secs)
    }

    /// Email retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.email.max_attempts,
            backoff_step: Duration::from_millis(self.email.backoff_step_ms),
            attempt_timeout: Duration::from_secs(self.email.attempt_timeout_secs),
            total_timeout: Duration::from_secs(self.email.total_timeout_secs),
        }
    }

    /// Location resolver budgets.
    #[must_use]
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            freshness: Duration::from_secs(self.location.freshness_secs),
            geocode_timeout: Duration::from_secs(self.location.geocode_timeout_secs),
            gps_only_timeout: Duration::from_secs(self.location.gps_only_timeout_secs),
        }
    }

    /// Default budget for a standalone location resolution.
    #[must_use]
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.location.resolve_timeout_secs)
    }

    /// Sweep settings.
    #[must_use]
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            batch_limit: self.storage.pending_batch_limit,
            chunk_size: self.sweep.chunk_size,
            item_timeout: Duration::from_secs(self.sweep.item_timeout_secs),
            auto_resend: self.sweep.auto_resend,
            remote_resync_count: self.sweep.remote_resync_count,
            location_budget: self.resolve_timeout(),
            retention: self.retention(),
        }
    }
}
