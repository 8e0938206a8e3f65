//! The daemon event loop.

use std::path::PathBuf;
use std::sync::Arc;

use confdir::{ConfdirSettings, ConfigService, Configuration, LogFormat, ReloadOutcome};
use confdir_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{DaemonError, DaemonResult};

/// Why a reload was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// A watched file changed.
    FileChange(PathBuf),
    /// `SIGHUP` or an explicit request.
    Administrative,
}

/// Telemetry settings derived from the daemon settings.
pub fn telemetry_config(settings: &ConfdirSettings) -> TelemetryConfig {
    let logging = LogConfig {
        level: settings.logging.level.clone(),
        json_format: settings.logging.format == LogFormat::Json,
        file_line_info: settings.logging.format == LogFormat::Pretty,
        ..LogConfig::default()
    };
    let metrics = MetricsConfig {
        enabled: settings.metrics.enabled,
        addr: settings.metrics.addr.clone(),
    };
    TelemetryConfig::builder().logging(logging).metrics(metrics).build()
}

/// Keeps a configuration tree loaded and reloads it on demand.
#[derive(Debug)]
pub struct Daemon {
    service: ConfigService,
}

impl Daemon {
    /// Start the configuration service.
    ///
    /// Must be called within a tokio runtime for file watching to work.
    pub fn new(settings: ConfdirSettings) -> DaemonResult<Self> {
        Ok(Self {
            service: ConfigService::start(settings)?,
        })
    }

    /// The loaded configuration.
    pub fn configuration(&self) -> &Arc<Configuration> {
        self.service.configuration()
    }

    /// Rescan the configuration on the blocking pool.
    pub async fn reload(&self, trigger: ReloadTrigger) -> DaemonResult<ReloadOutcome> {
        info!(trigger = ?trigger, "Reloading configuration");
        let config = Arc::clone(self.service.configuration());
        tokio::task::spawn_blocking(move || config.reload_configuration())
            .await
            .map_err(|e| DaemonError::task(format!("reload task failed: {e}")))
    }

    /// Run until Ctrl-C, reloading on file changes and `SIGHUP`.
    pub async fn run(self) -> DaemonResult<()> {
        let (tx, mut rx) = mpsc::channel(16);
        let forwarder = if self.service.settings().watch.enabled {
            Some(self.spawn_reload_watcher(tx)?)
        } else {
            None
        };
        let mut hangup = hangup_signal()?;

        info!("Configuration daemon running");
        loop {
            let trigger = tokio::select! {
                Some(trigger) = rx.recv() => trigger,
                () = next_hangup(&mut hangup) => ReloadTrigger::Administrative,
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    break;
                }
            };

            // One rescan covers every change queued so far.
            while rx.try_recv().is_ok() {}

            match self.reload(trigger).await {
                Ok(outcome) if !outcome.failed.is_empty() => {
                    warn!(failed = ?outcome.failed, "Some consumers failed to reload");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Reload failed"),
            }
        }

        info!("Shutting down configuration daemon");
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        self.service.stop();
        Ok(())
    }

    fn spawn_reload_watcher(&self, tx: mpsc::Sender<ReloadTrigger>) -> DaemonResult<JoinHandle<()>> {
        let mut watcher = self.service.watch_for_reload()?;
        Ok(tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                debug!(path = %event.path.display(), kind = ?event.kind, "Configuration file event");
                // A full queue already guarantees a pending rescan.
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    tx.try_send(ReloadTrigger::FileChange(event.path))
                {
                    break;
                }
            }
        }))
    }
}

#[cfg(unix)]
type HangupSignal = tokio::signal::unix::Signal;

#[cfg(unix)]
fn hangup_signal() -> DaemonResult<HangupSignal> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok(signal(SignalKind::hangup())?)
}

#[cfg(unix)]
async fn next_hangup(signal: &mut HangupSignal) {
    if signal.recv().await.is_none() {
        std::future::pending::<()>().await;
    }
}

#[cfg(not(unix))]
struct HangupSignal;

#[cfg(not(unix))]
fn hangup_signal() -> DaemonResult<HangupSignal> {
    Ok(HangupSignal)
}

#[cfg(not(unix))]
async fn next_hangup(_signal: &mut HangupSignal) {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use confdir::WatchSettings;
    use std::fs;
    use tempfile::TempDir;

    fn settings_for(dir: &TempDir) -> ConfdirSettings {
        ConfdirSettings::builder()
            .directory(dir.path())
            .watch(WatchSettings {
                enabled: false,
                debounce_ms: 50,
            })
            .build()
    }

    #[test]
    fn test_telemetry_config_mapping() {
        let mut settings = ConfdirSettings::development();
        settings.metrics.enabled = true;
        settings.metrics.addr = "127.0.0.1:9999".to_string();

        let telemetry = telemetry_config(&settings);
        assert_eq!(telemetry.logging.level, "debug");
        assert!(!telemetry.logging.json_format);
        assert!(telemetry.metrics.enabled);
        assert_eq!(telemetry.metrics.addr, "127.0.0.1:9999");

        let telemetry = telemetry_config(&ConfdirSettings::production());
        assert!(telemetry.logging.json_format);
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.properties");
        fs::write(&path, "name = one\n").unwrap();

        let daemon = Daemon::new(settings_for(&dir)).unwrap();
        let outcome = daemon.reload(ReloadTrigger::Administrative).await.unwrap();
        assert!(outcome.is_noop());

        fs::write(&path, "name = two\n").unwrap();
        let outcome = daemon
            .reload(ReloadTrigger::FileChange(path.clone()))
            .await
            .unwrap();
        assert!(!outcome.is_noop());
        assert_eq!(daemon.configuration().property("name").as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_new_fails_for_missing_directory() {
        let settings = ConfdirSettings::builder().directory("/nonexistent/confdird").build();
        assert!(matches!(Daemon::new(settings), Err(DaemonError::Config(_))));
    }
}
