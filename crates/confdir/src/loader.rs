//! Layered loading of [`ConfdirSettings`].

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::configuration::PROPDIR_ENV;
use crate::error::{ConfigError, ConfigResult};
use crate::settings::{ConfdirSettings, LogFormat};

/// Default prefix of environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "CONFDIR";

/// Loads settings in layers, later layers overriding earlier ones:
///
/// 1. built-in defaults
/// 2. a TOML or JSON file
/// 3. a `.env` file
/// 4. `PREFIX__SECTION__KEY` environment variables
/// 5. directories added with [`SettingsLoader::with_directory`]
///
/// If no directory is configured by any layer, `CONFDIR_PROPDIR` is used.
///
/// ```no_run
/// use confdir::SettingsLoader;
///
/// # fn main() -> Result<(), confdir::ConfigError> {
/// let settings = SettingsLoader::new()
///     .with_optional_file("/etc/confdir.toml")?
///     .with_dotenv()
///     .with_env_prefix("CONFDIR")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SettingsLoader {
    settings: ConfdirSettings,
    env_prefix: Option<String>,
    directories: Vec<PathBuf>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: ConfdirSettings::default(),
            env_prefix: None,
            directories: Vec::new(),
        }
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.settings = ConfdirSettings::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.settings = ConfdirSettings::production();
        self
    }

    /// Load a `.toml` or `.json` settings file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, has an
    /// unsupported extension, does not parse or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        self.settings = Self::parse_file(&content, path)?;
        debug!(path = %path.display(), "Loaded settings file");
        Ok(self)
    }

    /// Like [`SettingsLoader::with_file`], but a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> ConfigResult<Self> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load settings from a string in `format` (`toml` or `json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> ConfigResult<Self> {
        self.settings = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::invalid_config(format!(
                    "unsupported settings format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Read a `.env` file into the process environment, if there is one.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env file");
        }
        self
    }

    /// Apply `PREFIX__SECTION__KEY` environment overrides on load.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Append a configuration directory after all other layers.
    #[must_use]
    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or the final
    /// settings are invalid.
    pub fn load(mut self) -> ConfigResult<ConfdirSettings> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }
        self.settings.directories.append(&mut self.directories);
        if self.settings.directories.is_empty() {
            if let Some(value) = env::var_os(PROPDIR_ENV) {
                self.settings.directories = split_directories(&value);
            }
        }
        self.settings.validate()?;
        Ok(self.settings)
    }

    /// Return the settings without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> ConfdirSettings {
        self.settings
    }

    fn parse_file(content: &str, path: &Path) -> ConfigResult<ConfdirSettings> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::invalid_config(format!(
                "unsupported settings file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> ConfigResult<()> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Same prefix but a different variable, e.g. CONFDIR_PROPDIR.
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();

        match parts.as_slice() {
            ["DIRECTORIES"] => {
                self.settings.directories = split_directories(value.as_ref());
            }

            ["WATCH", "ENABLED"] => {
                self.settings.watch.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["WATCH", "DEBOUNCE_MS"] => {
                self.settings.watch.debounce_ms = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }

            ["PROVIDER", "CAPABILITY_PREFIX"] => {
                self.settings.provider.capability_prefix = value.to_string();
            }

            ["LOGGING", "LEVEL"] => {
                self.settings.logging.level = value.to_string();
            }
            ["LOGGING", "FORMAT"] => {
                self.settings.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }

            ["METRICS", "ENABLED"] => {
                self.settings.metrics.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }
            ["METRICS", "ADDR"] => {
                self.settings.metrics.addr = value.to_string();
            }

            _ => debug!(var = %key, "Ignoring unknown settings override"),
        }

        Ok(())
    }
}

/// Split a `PATH`-style directory list, skipping empty entries.
pub(crate) fn split_directories(value: &std::ffi::OsStr) -> Vec<PathBuf> {
    env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
