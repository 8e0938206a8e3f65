//! Directory-scanned configuration with live reload.
//!
//! `confdir` loads a groupware server's configuration tree into memory and
//! keeps it current:
//! - `.properties` files (and the `mpasswd` file) become one global
//!   property map, later files overriding earlier ones
//! - `.yml`/`.yaml` files are parsed into [`YamlValue`] documents
//! - `.xml` files are tracked by content digest for change detection
//! - a reload rescans everything, diffs against the previous scan and
//!   notifies the [`Reloadable`] consumers interested in the changed files
//! - single properties can be watched with a [`PropertyListener`]
//! - the [`ServerConfigProvider`] exposes the `server` scope with metadata
//!   merged from the `settings` and `meta` folders
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use confdir::{Configuration, Interests, Reloadable};
//!
//! struct MailTransport;
//!
//! impl Reloadable for MailTransport {
//!     fn interests(&self) -> Interests {
//!         Interests::files(["mail.properties"])
//!     }
//!
//!     fn reload(&self, config: &Configuration) -> anyhow::Result<()> {
//!         let host = config.property_or("mail.host", "localhost");
//!         println!("reconnecting to {host}");
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), confdir::ConfigError> {
//! let config = Configuration::new(vec!["/opt/groupware/etc".into()])?;
//! config.register_reloadable(Arc::new(MailTransport));
//!
//! let port = config.int_property("mail.port", 143);
//! let outcome = config.reload_configuration();
//! println!("{port} {}", outcome.changes.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Directories
//!
//! The directory list is fixed at construction. [`Configuration::from_env`]
//! reads it from `CONFDIR_PROPDIR`, entries separated like `PATH`. Within a
//! directory, entries are visited in lexicographic order, so override
//! precedence does not depend on the file system.

#![warn(missing_docs)]

mod configuration;
mod error;
pub mod index;
mod loader;
pub mod properties;
pub mod property_watcher;
pub mod provider;
pub mod reload;
pub mod scanner;
mod service;
mod settings;
mod watcher;
pub mod yaml;

pub use configuration::{Configuration, PROPDIR_ENV};
pub use error::{ConfigError, ConfigResult};
pub use index::ConfigIndex;
pub use loader::{SettingsLoader, DEFAULT_ENV_PREFIX};
pub use property_watcher::{
    PropertyEvent, PropertyEventKind, PropertyListener, PropertyWatcher, WatcherRegistry,
};
pub use provider::{ServerConfigProvider, ServerProperty, SCOPE};
pub use reload::{ChangeSet, Interests, ReloadOutcome, Reloadable, ReloadableRegistry};
pub use service::ConfigService;
pub use settings::{
    ConfdirSettings, ConfdirSettingsBuilder, LogFormat, LoggingSettings, MetricsSettings,
    ProviderSettings, WatchSettings,
};
pub use watcher::{
    FileChangeEvent, FileChangeKind, FileWatcher, FileWatcherBuilder, FileWatcherConfig,
    CONFIG_EXTENSIONS,
};
pub use yaml::YamlValue;
