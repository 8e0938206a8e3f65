//! The root configuration object.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::index::ConfigIndex;
use crate::loader::split_directories;
use crate::property_watcher::{PropertyListener, WatcherRegistry};
use crate::provider::{ServerConfigProvider, DEFAULT_CAPABILITY_PREFIX};
use crate::reload::{ChangeSet, ReloadOutcome, Reloadable, ReloadableRegistry};
use crate::scanner::validate_directories;
use crate::yaml::YamlValue;

/// Environment variable naming the configuration directories.
pub const PROPDIR_ENV: &str = "CONFDIR_PROPDIR";

/// Directory-scanned configuration with reload support.
///
/// Reads go against the last published [`ConfigIndex`]. A reload builds a
/// complete new index and swaps it in, so readers see either the old or the
/// new state and never a partially scanned one.
pub struct Configuration {
    dirs: Vec<PathBuf>,
    index: RwLock<Arc<ConfigIndex>>,
    reload_lock: Mutex<()>,
    reloadables: ReloadableRegistry,
    watchers: WatcherRegistry,
    provider: ServerConfigProvider,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("dirs", &self.dirs)
            .field("reloadables", &self.reloadables)
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// Scan `dirs` and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDirectories`] for an empty list and
    /// [`ConfigError::InvalidDirectory`] if any entry is missing or not a
    /// directory.
    pub fn new(dirs: Vec<PathBuf>) -> ConfigResult<Self> {
        Self::with_capability_prefix(dirs, DEFAULT_CAPABILITY_PREFIX)
    }

    /// Like [`Configuration::new`], with a custom capability prefix for the
    /// server-scope provider.
    ///
    /// # Errors
    ///
    /// See [`Configuration::new`].
    pub fn with_capability_prefix(
        dirs: Vec<PathBuf>,
        capability_prefix: impl Into<String>,
    ) -> ConfigResult<Self> {
        if dirs.is_empty() {
            return Err(ConfigError::NoDirectories { var: PROPDIR_ENV });
        }
        validate_directories(&dirs)?;

        let index = Arc::new(ConfigIndex::build(&dirs));
        let provider = ServerConfigProvider::new(&dirs, Arc::clone(&index), capability_prefix);
        confdir_telemetry::metrics::record_property_count(index.properties().len());
        info!(
            directories = ?dirs,
            properties = index.properties().len(),
            "Configuration loaded"
        );

        Ok(Self {
            dirs,
            index: RwLock::new(index),
            reload_lock: Mutex::new(()),
            reloadables: ReloadableRegistry::new(),
            watchers: WatcherRegistry::new(),
            provider,
        })
    }

    /// Build from the directories listed in `CONFDIR_PROPDIR`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDirectories`] when the variable is unset or
    /// empty, otherwise see [`Configuration::new`].
    pub fn from_env() -> ConfigResult<Self> {
        let value = env::var_os(PROPDIR_ENV).ok_or(ConfigError::NoDirectories { var: PROPDIR_ENV })?;
        Self::new(split_directories(&value))
    }

    /// Root directories, fixed at construction.
    pub fn directories(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The currently published index.
    pub fn snapshot(&self) -> Arc<ConfigIndex> {
        Arc::clone(&self.index.read())
    }

    /// Value of a property.
    pub fn property(&self, name: &str) -> Option<String> {
        self.index.read().property(name).map(str::to_string)
    }

    /// Value of a property, or `default`.
    pub fn property_or(&self, name: &str, default: &str) -> String {
        self.property(name).unwrap_or_else(|| default.to_string())
    }

    /// Boolean property: `true` (any case) is true, any other value false.
    pub fn bool_property(&self, name: &str, default: bool) -> bool {
        self.property(name)
            .map_or(default, |v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Integer property. Values that do not parse yield `default`.
    pub fn int_property(&self, name: &str, default: i64) -> i64 {
        let Some(value) = self.property(name) else {
            return default;
        };
        match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(property = %name, value = %value, error = %e, "Property is not an integer, using default");
                default
            }
        }
    }

    /// Value of a property, registering `listener` for later changes to it.
    ///
    /// The listener is attached only when the property is currently defined,
    /// since it is the owning file that gets watched.
    pub fn property_with_listener<L: PropertyListener>(
        &self,
        name: &str,
        default: &str,
        listener: Arc<L>,
    ) -> String {
        let index = self.snapshot();
        let Some(value) = index.property(name) else {
            debug!(property = %name, "Not watching undefined property");
            return default.to_string();
        };
        if let Some(file) = index.property_file(name) {
            self.watchers
                .watch(name, file, Some(value.to_string()), listener);
        }
        value.to_string()
    }

    /// Stop delivering changes of `name` to the listener of type `L`.
    pub fn remove_property_listener<L: PropertyListener>(&self, name: &str) -> bool {
        self.watchers.unwatch::<L>(name)
    }

    /// All property names, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.read().properties().keys().cloned().collect();
        names.sort();
        names
    }

    /// Properties whose name starts with `prefix`.
    pub fn properties_with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.filtered(|name| name.starts_with(prefix))
    }

    /// Properties whose name matches `pattern`.
    pub fn properties_matching(&self, pattern: &Regex) -> BTreeMap<String, String> {
        self.filtered(|name| pattern.is_match(name))
    }

    /// Properties defined by files below `<root>/<folder>` for any root.
    pub fn properties_in_folder(&self, folder: &str) -> BTreeMap<String, String> {
        self.index.read().properties_under(&self.folder(folder))
    }

    /// Properties loaded from the file called `file_name`.
    pub fn properties_in_file(&self, file_name: &str) -> BTreeMap<String, String> {
        let index = self.index.read();
        index
            .file_by_name(file_name)
            .and_then(|path| index.properties_by_file().get(path))
            .map(|props| props.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Path of the properties file called `file_name`.
    pub fn file_by_name(&self, file_name: &str) -> Option<PathBuf> {
        self.index.read().file_by_name(file_name).map(Path::to_path_buf)
    }

    /// YAML document by file name, with or without the extension.
    pub fn yaml(&self, file_name: &str) -> Option<YamlValue> {
        self.index.read().yaml(file_name).cloned()
    }

    /// YAML documents below `<root>/<folder>` for any root.
    pub fn yaml_in_folder(&self, folder: &str) -> BTreeMap<PathBuf, YamlValue> {
        self.index.read().yaml_under(&self.folder(folder))
    }

    /// Rescan all directories and notify interested consumers.
    ///
    /// Per-file and per-consumer failures are logged and never returned.
    /// Concurrent calls are serialized. A call made from inside
    /// [`Reloadable::reload`] is refused with a warning and an empty outcome.
    pub fn reload_configuration(&self) -> ReloadOutcome {
        if crate::reload::notifying() {
            warn!("Reload requested while notifying reloadables, ignoring");
            return ReloadOutcome::default();
        }
        let _guard = self.reload_lock.lock();
        let started = Instant::now();

        let previous = self.snapshot();
        let next = Arc::new(ConfigIndex::build(&self.dirs));
        let changes = ChangeSet::between(&previous, &next);
        *self.index.write() = Arc::clone(&next);
        confdir_telemetry::metrics::record_property_count(next.properties().len());

        let mut outcome = ReloadOutcome {
            changes,
            ..ReloadOutcome::default()
        };
        if !outcome.is_noop() {
            for path in outcome.changes.files() {
                debug!(path = %path.display(), "Configuration file changed");
            }
            self.provider.reinit(next);
            let (notified, failed) = self.reloadables.notify(self, &outcome.changes);
            outcome.notified = notified;
            outcome.failed = failed;
        }

        confdir_telemetry::metrics::record_reload(outcome.changes.len(), started.elapsed());
        outcome.log();
        outcome
    }

    /// Register a consumer. Returns `false` if the name is taken.
    pub fn register_reloadable(&self, reloadable: Arc<dyn Reloadable>) -> bool {
        self.reloadables.register(reloadable)
    }

    /// Remove a consumer by name.
    pub fn remove_reloadable(&self, name: &str) -> bool {
        self.reloadables.remove(name).is_some()
    }

    /// Registered consumers.
    pub fn reloadables(&self) -> &ReloadableRegistry {
        &self.reloadables
    }

    /// The server-scope provider.
    pub fn provider(&self) -> &ServerConfigProvider {
        &self.provider
    }

    /// The property watcher registry.
    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    /// Drop all consumers and property watchers.
    pub fn shutdown(&self) {
        self.reloadables.clear();
        self.watchers.clear();
        debug!("Configuration registries cleared");
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> BTreeMap<String, String> {
        self.index
            .read()
            .properties()
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn folder(&self, folder: &str) -> Vec<PathBuf> {
        self.dirs.iter().map(|dir| dir.join(folder)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_with(files: &[(&str, &str)]) -> (TempDir, Configuration) {
        let root = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = root.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let config = Configuration::new(vec![root.path().to_path_buf()]).unwrap();
        (root, config)
    }

    #[test]
    fn test_empty_directory_list_rejected() {
        assert!(matches!(
            Configuration::new(Vec::new()),
            Err(ConfigError::NoDirectories { .. })
        ));
    }

    #[test]
    fn test_scalar_accessors() {
        let (_root, config) = config_with(&[(
            "server.properties",
            "flag = TRUE\noff = yes\nport = 8009\nbroken = 12x\nname = ox\n",
        )]);

        assert_eq!(config.property("name").as_deref(), Some("ox"));
        assert_eq!(config.property_or("missing", "dflt"), "dflt");
        assert!(config.bool_property("flag", false));
        assert!(!config.bool_property("off", true));
        assert!(config.bool_property("missing", true));
        assert_eq!(config.int_property("port", 0), 8009);
        assert_eq!(config.int_property("broken", 7), 7);
        assert_eq!(config.int_property("missing", 3), 3);
    }

    #[test]
    fn test_bulk_accessors() {
        let (root, config) = config_with(&[
            ("mail.properties", "mail.host = imap\nmail.port = 143\n"),
            ("settings/ui.properties", "ui/theme = dark\n"),
        ]);

        assert_eq!(
            config.property_names(),
            vec!["mail.host", "mail.port", "ui/theme"]
        );
        assert_eq!(config.properties_with_prefix("mail.").len(), 2);
        let numeric = config.properties_matching(&Regex::new(r"\.port$").unwrap());
        assert_eq!(numeric.keys().collect::<Vec<_>>(), vec!["mail.port"]);
        assert_eq!(config.properties_in_folder("settings")["ui/theme"], "dark");
        assert_eq!(config.properties_in_file("mail.properties").len(), 2);
        assert!(config.properties_in_file("nothing.properties").is_empty());
        assert_eq!(
            config.file_by_name("mail.properties"),
            Some(root.path().join("mail.properties"))
        );
    }

    #[test]
    fn test_yaml_accessors() {
        let (root, config) = config_with(&[
            ("features.yml", "beta: true\n"),
            ("meta/ui.yaml", "x:\n  protected: false\n"),
        ]);

        let doc = config.yaml("features").unwrap();
        assert_eq!(doc.lookup("beta").and_then(YamlValue::as_str), Some("true"));
        let meta = config.yaml_in_folder("meta");
        assert!(meta.contains_key(&root.path().join("meta/ui.yaml")));
    }

    #[test]
    fn test_reload_without_changes_is_noop() {
        let (_root, config) = config_with(&[("a.properties", "a = 1\n")]);
        assert!(config.reload_configuration().is_noop());
    }

    #[test]
    fn test_reload_from_inside_reloadable_is_refused() {
        #[derive(Default)]
        struct Reentrant {
            nested: Mutex<Option<ReloadOutcome>>,
        }
        impl Reloadable for Reentrant {
            fn reload(&self, config: &Configuration) -> anyhow::Result<()> {
                *self.nested.lock() = Some(config.reload_configuration());
                Ok(())
            }
        }

        let (root, config) = config_with(&[("a.properties", "a = 1\n")]);
        let reentrant = Arc::new(Reentrant::default());
        config.register_reloadable(reentrant.clone());

        fs::write(root.path().join("a.properties"), "a = 2\n").unwrap();
        let outcome = config.reload_configuration();

        assert_eq!(outcome.notified.len(), 1);
        assert!(reentrant.nested.lock().as_ref().is_some_and(ReloadOutcome::is_noop));
        assert_eq!(config.property("a").as_deref(), Some("2"));

        // The thread is usable for reloads again afterwards.
        fs::write(root.path().join("a.properties"), "a = 3\n").unwrap();
        assert!(!config.reload_configuration().is_noop());
    }

    #[test]
    fn test_shutdown_clears_registries() {
        struct Nop;
        impl Reloadable for Nop {
            fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let (_root, config) = config_with(&[("a.properties", "a = 1\n")]);
        assert!(config.register_reloadable(Arc::new(Nop)));
        config.shutdown();
        assert!(config.reloadables().is_empty());
        assert!(config.watchers().is_empty());
    }
}
