//! File watching for configuration directories.
//!
//! [`FileWatcher`] wraps the `notify` crate and turns raw file system events
//! into debounced [`FileChangeEvent`]s for the file types the scanner loads.
//! It is the notification channel behind both the debounced full reload and
//! the single-property watchers in [`crate::property_watcher`].
//!
//! # Example
//!
//! ```no_run
//! use confdir::FileWatcher;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), confdir::ConfigError> {
//! let mut watcher = FileWatcher::new()
//!     .with_debounce(Duration::from_millis(500))
//!     .watch_path("/opt/groupware/etc")?
//!     .watch_config_files()
//!     .on_change(|event| {
//!         println!("{:?} {:?}", event.kind, event.path);
//!     })
//!     .build()?;
//!
//! watcher.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Callbacks run on the task that drives [`FileWatcher::run`]; anything slow
//! (a full reload, for instance) should be handed off.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};

use crate::scanner::MPASSWD_FILE_NAME;
use crate::ConfigError;

/// Extensions of the files the configuration scanner loads.
pub const CONFIG_EXTENSIONS: &[&str] = &["properties", "yml", "yaml", "xml"];

/// A debounced change to one file.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Path to the changed file.
    pub path: PathBuf,
    /// Kind of change.
    pub kind: FileChangeKind,
    /// When the change was detected.
    pub timestamp: Instant,
}

impl FileChangeEvent {
    /// Event for `path` detected now.
    pub fn new(path: impl Into<PathBuf>, kind: FileChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: Instant::now(),
        }
    }
}

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// File was created.
    Created,
    /// File contents or metadata changed.
    Modified,
    /// File was deleted.
    Deleted,
    /// File was renamed.
    Renamed,
}

impl From<&EventKind> for FileChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => FileChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => FileChangeKind::Renamed,
            EventKind::Remove(_) => FileChangeKind::Deleted,
            EventKind::Modify(_) | EventKind::Access(_) | EventKind::Other | EventKind::Any => {
                FileChangeKind::Modified
            }
        }
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    /// Paths to watch (files or directories).
    pub paths: Vec<PathBuf>,
    /// A path is reported once it has seen no events for this long.
    pub debounce: Duration,
    /// Whether to watch directories recursively.
    pub recursive: bool,
    /// File extensions to report (empty together with `file_names` = all files).
    pub extensions: HashSet<String>,
    /// Exact file names to report regardless of extension.
    pub file_names: HashSet<String>,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce: Duration::from_millis(500),
            recursive: true,
            extensions: HashSet::new(),
            file_names: HashSet::new(),
        }
    }
}

impl FileWatcherConfig {
    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() && self.file_names.is_empty() {
            return true;
        }
        let by_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.file_names.contains(n));
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(e));
        by_name || by_extension
    }
}

/// Builder for creating a [`FileWatcher`].
pub struct FileWatcherBuilder {
    config: FileWatcherConfig,
    callback: Option<Arc<dyn Fn(FileChangeEvent) + Send + Sync>>,
}

impl FileWatcherBuilder {
    /// Create a new file watcher builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: FileWatcherConfig::default(),
            callback: None,
        }
    }

    /// Set the debounce duration. Default is 500ms.
    #[must_use]
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.config.debounce = duration;
        self
    }

    /// Add a path to watch.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist.
    pub fn watch_path<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path does not exist: {}", path.display()),
            )));
        }
        self.config.paths.push(path.to_path_buf());
        Ok(self)
    }

    /// Add several paths to watch.
    pub fn watch_paths<I, P>(self, paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().try_fold(self, |builder, path| builder.watch_path(path))
    }

    /// Set whether to watch directories recursively. Default is true.
    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.config.recursive = recursive;
        self
    }

    /// Only report files with these extensions.
    #[must_use]
    pub fn watch_extensions(mut self, extensions: &[&str]) -> Self {
        self.config
            .extensions
            .extend(extensions.iter().map(|s| (*s).to_string()));
        self
    }

    /// Only report the file types the configuration scanner loads.
    #[must_use]
    pub fn watch_config_files(mut self) -> Self {
        self = self.watch_extensions(CONFIG_EXTENSIONS);
        self.config.file_names.insert(MPASSWD_FILE_NAME.to_string());
        self
    }

    /// Set the callback for file change events.
    #[must_use]
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(FileChangeEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Build the file watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if no paths are configured or if the watcher cannot be created.
    pub fn build(self) -> Result<FileWatcher, ConfigError> {
        if self.config.paths.is_empty() {
            return Err(ConfigError::invalid_config(
                "No paths configured for file watcher",
            ));
        }

        let (tx, rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    // Receiver gone means the watcher is shutting down.
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "File watch error"),
            }
        })
        .map_err(|e| ConfigError::invalid_config(format!("Failed to create file watcher: {e}")))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        for path in &self.config.paths {
            watcher.watch(path, mode).map_err(|e| {
                ConfigError::Io(std::io::Error::other(format!(
                    "Failed to watch path {}: {e}",
                    path.display()
                )))
            })?;
            debug!(path = %path.display(), "Watching configuration path");
        }

        Ok(FileWatcher {
            _watcher: watcher,
            rx,
            config: self.config,
            callback: self.callback,
            pending: HashMap::new(),
            ready: VecDeque::new(),
        })
    }
}

impl Default for FileWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A change waiting for its path to go quiet.
#[derive(Debug, Clone, Copy)]
struct PendingChange {
    kind: FileChangeKind,
    detected: Instant,
    deadline: TokioInstant,
}

/// Watches configuration paths and reports debounced changes.
///
/// Changes are reported on the trailing edge: a path is reported once no
/// further event for it arrived within the debounce window, so a burst of
/// writes yields one change observed after the last write. Deletions are
/// reported immediately.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    config: FileWatcherConfig,
    callback: Option<Arc<dyn Fn(FileChangeEvent) + Send + Sync>>,
    pending: HashMap<PathBuf, PendingChange>,
    ready: VecDeque<FileChangeEvent>,
}

impl FileWatcher {
    /// Create a new file watcher builder.
    #[must_use]
    pub fn new() -> FileWatcherBuilder {
        FileWatcherBuilder::new()
    }

    /// Process events until the watcher is dropped, invoking the callback
    /// for each debounced change.
    pub async fn run(&mut self) -> Result<(), ConfigError> {
        while let Some(change) = self.next().await {
            if let Some(callback) = &self.callback {
                callback(change);
            }
        }
        Ok(())
    }

    /// Return a change that is already due, without waiting.
    pub fn poll(&mut self) -> Option<FileChangeEvent> {
        while let Ok(event) = self.rx.try_recv() {
            self.process_event(&event);
        }
        self.flush_due(TokioInstant::now());
        self.ready.pop_front()
    }

    /// Wait for the next change.
    ///
    /// Returns `None` once the underlying watcher is gone and every pending
    /// change has been delivered.
    pub async fn next(&mut self) -> Option<FileChangeEvent> {
        loop {
            self.flush_due(TokioInstant::now());
            if let Some(change) = self.ready.pop_front() {
                return Some(change);
            }

            let deadline = self.pending.values().map(|p| p.deadline).min();
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => self.process_event(&event),
                    None => {
                        self.flush_all();
                        return self.ready.pop_front();
                    }
                },
                () = sleep_until(deadline) => {}
            }
        }
    }

    fn process_event(&mut self, event: &Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
            _ => return,
        }

        let now = Instant::now();
        let deadline = TokioInstant::now() + self.config.debounce;

        for (index, path) in event.paths.iter().enumerate() {
            if !self.config.accepts(path) {
                continue;
            }
            let kind = path_change_kind(&event.kind, index);
            if kind == FileChangeKind::Deleted {
                self.pending.remove(path);
                self.ready.push_back(FileChangeEvent {
                    path: path.clone(),
                    kind,
                    timestamp: now,
                });
                continue;
            }

            // A burst that starts with a create is still a create.
            let kind = match self.pending.get(path) {
                Some(earlier) if earlier.kind == FileChangeKind::Created => earlier.kind,
                _ => kind,
            };
            self.pending.insert(
                path.clone(),
                PendingChange {
                    kind,
                    detected: now,
                    deadline,
                },
            );
        }
    }

    fn flush_due(&mut self, now: TokioInstant) {
        let mut due: Vec<(PathBuf, PendingChange)> = Vec::new();
        self.pending.retain(|path, change| {
            if change.deadline <= now {
                due.push((path.clone(), *change));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.1.deadline.cmp(&b.1.deadline).then_with(|| a.0.cmp(&b.0)));
        self.ready
            .extend(due.into_iter().map(|(path, change)| FileChangeEvent {
                path,
                kind: change.kind,
                timestamp: change.detected,
            }));
    }

    fn flush_all(&mut self) {
        if let Some(latest) = self.pending.values().map(|p| p.deadline).max() {
            self.flush_due(latest);
        }
    }
}

/// Kind of change for the `index`th path of a raw event. The source of a
/// two-path rename is gone afterwards, so it counts as a deletion.
fn path_change_kind(kind: &EventKind, index: usize) -> FileChangeKind {
    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileChangeKind::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if index == 0 => {
            FileChangeKind::Deleted
        }
        other => FileChangeKind::from(other),
    }
}

async fn sleep_until(deadline: Option<TokioInstant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
