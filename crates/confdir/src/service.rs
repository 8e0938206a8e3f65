//! Service lifecycle around a [`Configuration`].
//!
//! [`ConfigService`] owns the configuration and, when watching is enabled,
//! a background task feeding file events into the property watchers. The
//! registries live as long as the service and are cleared on [`ConfigService::stop`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConfigResult;
use crate::settings::ConfdirSettings;
use crate::watcher::FileWatcher;
use crate::Configuration;

/// A running configuration subsystem.
pub struct ConfigService {
    settings: ConfdirSettings,
    config: Arc<Configuration>,
    property_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService")
            .field("settings", &self.settings)
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl ConfigService {
    /// Validate `settings`, load the configuration and start watching.
    ///
    /// Property watching needs a tokio runtime; without one the service
    /// starts with watching disabled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the settings are invalid, a directory is
    /// unusable, or the file watcher cannot be created.
    pub fn start(settings: ConfdirSettings) -> ConfigResult<Self> {
        settings.validate()?;
        let config = Arc::new(Configuration::with_capability_prefix(
            settings.directories.clone(),
            settings.provider.capability_prefix.clone(),
        )?);

        let service = Self {
            settings,
            config,
            property_task: Mutex::new(None),
        };

        if service.settings.watch.enabled {
            match Handle::try_current() {
                Ok(handle) => {
                    let watcher = service.file_watcher()?;
                    let config = Arc::clone(&service.config);
                    let task = handle.spawn(dispatch_property_events(watcher, config));
                    *service.property_task.lock() = Some(task);
                }
                Err(_) => warn!("No tokio runtime available, property watching disabled"),
            }
        }

        info!(
            directories = ?service.settings.directories,
            watching = service.is_watching(),
            "Configuration service started"
        );
        Ok(service)
    }

    /// The managed configuration.
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// The settings the service was started with.
    pub fn settings(&self) -> &ConfdirSettings {
        &self.settings
    }

    /// Whether the property watch task is running.
    pub fn is_watching(&self) -> bool {
        self.property_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// A watcher over all configuration directories, debounced as configured.
    ///
    /// Callers drive it and call [`Configuration::reload_configuration`] on
    /// its events, typically from a blocking task since a reload rescans
    /// the whole tree.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the watcher cannot be created.
    pub fn watch_for_reload(&self) -> ConfigResult<FileWatcher> {
        self.file_watcher()
    }

    /// Stop watching and clear all registries.
    pub fn stop(&self) {
        if let Some(task) = self.property_task.lock().take() {
            task.abort();
        }
        self.config.shutdown();
        info!("Configuration service stopped");
    }

    fn file_watcher(&self) -> ConfigResult<FileWatcher> {
        FileWatcher::new()
            .with_debounce(self.settings.watch.debounce())
            .watch_paths(&self.settings.directories)?
            .watch_config_files()
            .build()
    }
}

impl Drop for ConfigService {
    fn drop(&mut self) {
        if let Some(task) = self.property_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn dispatch_property_events(mut watcher: FileWatcher, config: Arc<Configuration>) {
    while let Some(event) = watcher.next().await {
        if config.watchers().is_empty() {
            continue;
        }
        debug!(path = %event.path.display(), kind = ?event.kind, "Dispatching file event to property watchers");
        let config = Arc::clone(&config);
        // Watchers re-read files from disk.
        let dispatched = tokio::task::spawn_blocking(move || config.watchers().dispatch(&event)).await;
        if let Err(e) = dispatched {
            warn!(error = %e, "Property watcher dispatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_watcher::{PropertyEvent, PropertyEventKind, PropertyListener};
    use crate::settings::WatchSettings;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct Collect(parking_lot::Mutex<Vec<PropertyEvent>>);

    impl PropertyListener for Collect {
        fn on_property_change(&self, event: &PropertyEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn settings_for(dir: &TempDir, watch: bool) -> ConfdirSettings {
        ConfdirSettings::builder()
            .directory(dir.path())
            .watch(WatchSettings {
                enabled: watch,
                debounce_ms: 20,
            })
            .build()
    }

    #[test]
    fn test_start_rejects_invalid_settings() {
        assert!(ConfigService::start(ConfdirSettings::default()).is_err());
        let missing = ConfdirSettings::builder().directory("/nonexistent/confdir").build();
        assert!(ConfigService::start(missing).is_err());
    }

    #[test]
    fn test_start_without_runtime_disables_watching() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.properties"), "a = 1\n").unwrap();

        let service = ConfigService::start(settings_for(&dir, true)).unwrap();
        assert!(!service.is_watching());
        assert_eq!(service.configuration().property("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_stop_clears_registries() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.properties"), "a = 1\n").unwrap();

        let service = ConfigService::start(settings_for(&dir, true)).unwrap();
        assert!(service.is_watching());
        service
            .configuration()
            .property_with_listener("a", "", Arc::new(Collect::default()));
        assert_eq!(service.configuration().watchers().len(), 1);

        service.stop();
        assert!(!service.is_watching());
        assert!(service.configuration().watchers().is_empty());
    }

    #[tokio::test]
    async fn test_property_change_reaches_listener() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mail.properties");
        fs::write(&path, "mail.host = a\n").unwrap();

        let service = ConfigService::start(settings_for(&dir, true)).unwrap();
        let listener = Arc::new(Collect::default());
        let value = service
            .configuration()
            .property_with_listener("mail.host", "", Arc::clone(&listener));
        assert_eq!(value, "a");

        sleep(Duration::from_millis(100)).await;
        fs::write(&path, "mail.host = b\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while listener.0.lock().is_empty() && Instant::now() < deadline {
            sleep(Duration::from_millis(25)).await;
        }

        // File system events can be unreliable in CI.
        if let Some(event) = listener.0.lock().first() {
            assert_eq!(event.kind, PropertyEventKind::Change);
            assert_eq!(event.value.as_deref(), Some("b"));
        }
        service.stop();
    }

    #[tokio::test]
    async fn test_watch_for_reload_builds_watcher() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::start(settings_for(&dir, false)).unwrap();
        assert!(!service.is_watching());
        assert!(service.watch_for_reload().is_ok());
    }
}
