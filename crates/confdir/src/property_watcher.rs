//! Live tracking of individual properties.
//!
//! A [`PropertyWatcher`] follows one property in the file that defines it.
//! When that file changes only the watched property is re-read; listeners
//! hear about it when the value changes or disappears. Watchers live in a
//! [`WatcherRegistry`] owned by the [`Configuration`](crate::Configuration),
//! one per property name, and are evicted when their last listener leaves.

use std::any::TypeId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::properties::read_property;
use crate::watcher::{FileChangeEvent, FileChangeKind};

/// What happened to a watched property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEventKind {
    /// The value changed.
    Change,
    /// The property or its file is gone.
    Delete,
}

/// Notification delivered to a [`PropertyListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEvent {
    /// Property name.
    pub name: String,
    /// New value; `None` for deletions.
    pub value: Option<String>,
    /// Kind of event.
    pub kind: PropertyEventKind,
}

/// Receives change notifications for a watched property.
pub trait PropertyListener: Send + Sync + 'static {
    /// Called after the watcher has updated its cached value.
    fn on_property_change(&self, event: &PropertyEvent);
}

/// Tracks the value of one property in its owning file.
pub struct PropertyWatcher {
    name: String,
    file: PathBuf,
    case_insensitive: bool,
    value: Mutex<Option<String>>,
    listeners: RwLock<Vec<(TypeId, Arc<dyn PropertyListener>)>>,
}

impl std::fmt::Debug for PropertyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyWatcher")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("case_insensitive", &self.case_insensitive)
            .field("value", &*self.value.lock())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl PropertyWatcher {
    /// Create a watcher for `name` defined in `file` with its current value.
    pub fn new(
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        value: Option<String>,
        case_insensitive: bool,
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            case_insensitive,
            value: Mutex::new(value),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The watched property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file the property is read from.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Last known value.
    pub fn value(&self) -> Option<String> {
        self.value.lock().clone()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Register a listener. Only one listener per concrete type is kept;
    /// returns `false` if one of that type is already registered.
    pub fn add_listener<L: PropertyListener>(&self, listener: Arc<L>) -> bool {
        let type_id = TypeId::of::<L>();
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|(id, _)| *id == type_id) {
            return false;
        }
        let listener: Arc<dyn PropertyListener> = listener;
        listeners.push((type_id, listener));
        true
    }

    /// Remove the listener of type `L`. Returns whether one was removed.
    pub fn remove_listener<L: PropertyListener>(&self) -> bool {
        let type_id = TypeId::of::<L>();
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != type_id);
        listeners.len() != before
    }

    /// The owning file changed: re-read the property and notify on change.
    pub fn on_change(&self) {
        let event = {
            let mut current = self.value.lock();
            let fresh = match read_property(&self.file, &self.name) {
                Ok(fresh) => fresh,
                Err(ConfigError::ReadError { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    None
                }
                Err(e) => {
                    warn!(
                        property = %self.name,
                        path = %self.file.display(),
                        error = %e,
                        "Cannot re-read watched property"
                    );
                    return;
                }
            };

            match (current.clone(), fresh) {
                (Some(_), None) => {
                    *current = None;
                    Some(self.event(None, PropertyEventKind::Delete))
                }
                (None, None) => None,
                (Some(old), Some(new)) if self.same_value(&old, &new) => None,
                (_, Some(new)) => {
                    *current = Some(new.clone());
                    Some(self.event(Some(new), PropertyEventKind::Change))
                }
            }
        };

        if let Some(event) = event {
            self.notify(&event);
        }
    }

    /// The owning file was deleted: always notify a deletion.
    pub fn on_delete(&self) {
        *self.value.lock() = None;
        let event = self.event(None, PropertyEventKind::Delete);
        self.notify(&event);
    }

    fn same_value(&self, old: &str, new: &str) -> bool {
        if self.case_insensitive {
            old.eq_ignore_ascii_case(new)
        } else {
            old == new
        }
    }

    fn event(&self, value: Option<String>, kind: PropertyEventKind) -> PropertyEvent {
        PropertyEvent {
            name: self.name.clone(),
            value,
            kind,
        }
    }

    fn notify(&self, event: &PropertyEvent) {
        debug!(property = %event.name, kind = ?event.kind, "Notifying property listeners");
        let listeners: Vec<_> = self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener.on_property_change(event);
        }
    }
}

/// Registry of property watchers, one per property name.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    watchers: DashMap<String, Arc<PropertyWatcher>>,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `listener` to the watcher for `name`, creating the watcher if needed.
    ///
    /// Watchers compare values case-insensitively.
    pub fn watch<L: PropertyListener>(
        &self,
        name: &str,
        file: &Path,
        value: Option<String>,
        listener: Arc<L>,
    ) -> Arc<PropertyWatcher> {
        // The shard guard is held until the listener is attached, so a
        // concurrent `unwatch` cannot evict the watcher while it is empty.
        let entry = self
            .watchers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(PropertyWatcher::new(name, file, value, true)));
        if !entry.add_listener(listener) {
            debug!(property = %name, "Listener of this type already registered");
        }
        entry.value().clone()
    }

    /// Detach the listener of type `L` from `name`, evicting the watcher when
    /// it has no listeners left.
    pub fn unwatch<L: PropertyListener>(&self, name: &str) -> bool {
        let removed = self
            .watchers
            .get(name)
            .is_some_and(|w| w.remove_listener::<L>());
        self.watchers.remove_if(name, |_, w| w.listener_count() == 0);
        removed
    }

    /// Watcher for a property, if one exists.
    pub fn get(&self, name: &str) -> Option<Arc<PropertyWatcher>> {
        self.watchers.get(name).map(|w| w.clone())
    }

    /// Number of watched properties.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// Whether no property is watched.
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Drop all watchers.
    pub fn clear(&self) {
        self.watchers.clear();
    }

    /// Route a file event to the watchers of properties defined in that file.
    pub fn dispatch(&self, event: &FileChangeEvent) {
        let affected: Vec<Arc<PropertyWatcher>> = self
            .watchers
            .iter()
            .filter(|entry| same_file(entry.value().file(), &event.path))
            .map(|entry| entry.value().clone())
            .collect();

        let deleted = event.kind == FileChangeKind::Deleted || !event.path.exists();
        for watcher in affected {
            if deleted {
                watcher.on_delete();
            } else {
                watcher.on_change();
            }
        }
    }
}

// Event paths are absolute and may differ from scanned paths by symlinks;
// compare canonical parents since the file itself may be gone.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if a.file_name() != b.file_name() {
        return false;
    }
    match (a.parent(), b.parent()) {
        (Some(pa), Some(pb)) => match (pa.canonicalize(), pb.canonicalize()) {
            (Ok(ca), Ok(cb)) => ca == cb,
            _ => false,
        },
        _ => false,
    }
}
