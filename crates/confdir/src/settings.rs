//! Settings of the configuration subsystem itself.
//!
//! These are not the scanned configuration files but the knobs of the
//! component that scans them: where the directories are, whether to watch
//! them, and how to log and export metrics.
//!
//! ```toml
//! directories = ["/opt/open-xchange/etc"]
//!
//! [watch]
//! enabled = true
//! debounce_ms = 500
//!
//! [provider]
//! capability_prefix = "com.openexchange.capability."
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "127.0.0.1:9464"
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::provider::DEFAULT_CAPABILITY_PREFIX;

/// Root settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfdirSettings {
    /// Configuration root directories, scanned in order.
    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// File watching.
    #[serde(default)]
    pub watch: WatchSettings,

    /// Server-scope provider.
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Prometheus metrics.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl ConfdirSettings {
    /// Create a settings builder.
    #[must_use]
    pub fn builder() -> ConfdirSettingsBuilder {
        ConfdirSettingsBuilder::new()
    }

    /// Development preset: pretty debug logs, short debounce.
    #[must_use]
    pub fn development() -> Self {
        let mut settings = Self::default();
        settings.logging.level = "debug".to_string();
        settings.logging.format = LogFormat::Pretty;
        settings.watch.debounce_ms = 100;
        settings
    }

    /// Production preset: JSON logs, metrics exported.
    #[must_use]
    pub fn production() -> Self {
        let mut settings = Self::default();
        settings.logging.level = "info".to_string();
        settings.logging.format = LogFormat::Json;
        settings.metrics.enabled = true;
        settings
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when no directory is configured,
    /// the debounce is zero, the metrics address does not parse, or the
    /// capability prefix is empty.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.directories.is_empty() {
            return Err(ConfigError::invalid_value(
                "directories",
                "at least one configuration directory is required",
            ));
        }

        if self.watch.enabled && self.watch.debounce_ms == 0 {
            return Err(ConfigError::invalid_value(
                "watch.debounce_ms",
                "must be greater than zero",
            ));
        }

        if self.metrics.enabled && self.metrics.addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        if self.provider.capability_prefix.is_empty() {
            return Err(ConfigError::invalid_value(
                "provider.capability_prefix",
                "must not be empty",
            ));
        }

        Ok(())
    }
}

/// File watch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WatchSettings {
    /// Watch the directories and reload on change.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum time between two events for the same file.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl WatchSettings {
    /// The debounce as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    500
}

/// Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSettings {
    /// Prefix of capability properties, whose empty lookups are traced.
    #[serde(default = "default_capability_prefix")]
    pub capability_prefix: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            capability_prefix: default_capability_prefix(),
        }
    }
}

fn default_capability_prefix() -> String {
    DEFAULT_CAPABILITY_PREFIX.to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Filter directive (`info`, `confdir=debug,warn`, ...).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSettings {
    /// Export Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address of the exporter.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9464".to_string()
}

fn default_true() -> bool {
    true
}

/// Builder for [`ConfdirSettings`].
#[derive(Debug, Default)]
pub struct ConfdirSettingsBuilder {
    directories: Vec<PathBuf>,
    watch: Option<WatchSettings>,
    provider: Option<ProviderSettings>,
    logging: Option<LoggingSettings>,
    metrics: Option<MetricsSettings>,
}

impl ConfdirSettingsBuilder {
    /// Create a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a configuration directory.
    #[must_use]
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    /// Set the watch settings.
    #[must_use]
    pub fn watch(mut self, watch: WatchSettings) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Set the provider settings.
    #[must_use]
    pub fn provider(mut self, provider: ProviderSettings) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the logging settings.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSettings) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Set the metrics settings.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsSettings) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the settings. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> ConfdirSettings {
        ConfdirSettings {
            directories: self.directories,
            watch: self.watch.unwrap_or_default(),
            provider: self.provider.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            metrics: self.metrics.unwrap_or_default(),
        }
    }

    /// Build and validate the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> ConfigResult<ConfdirSettings> {
        let settings = self.build();
        settings.validate()?;
        Ok(settings)
    }
}
