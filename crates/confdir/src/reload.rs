//! Reload change detection and consumer notification.
//!
//! After a rescan, [`ChangeSet::between`] compares the previous and the new
//! [`ConfigIndex`] file by file. Consumers implementing [`Reloadable`] are
//! registered in a [`ReloadableRegistry`] and notified when the change set
//! touches a file they declared interest in.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info};

use crate::index::ConfigIndex;
use crate::Configuration;

/// Configuration files a [`Reloadable`] cares about.
///
/// No declared file names means "notify me on every change".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interests {
    config_file_names: Vec<String>,
}

impl Interests {
    /// Interested in any change.
    pub fn all() -> Self {
        Self::default()
    }

    /// Interested in files whose path ends with one of `names`.
    pub fn files<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config_file_names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Declared file names.
    pub fn config_file_names(&self) -> &[String] {
        &self.config_file_names
    }

    /// Whether a consumer with these interests should hear about `changes`.
    pub fn matches(&self, changes: &ChangeSet) -> bool {
        if self.config_file_names.is_empty() {
            return true;
        }
        changes.files().any(|path| {
            let path = path.to_string_lossy();
            self.config_file_names
                .iter()
                .any(|name| path.ends_with(name.as_str()))
        })
    }
}

/// A consumer that reacts to configuration reloads.
pub trait Reloadable: Send + Sync {
    /// Registry key. Defaults to the implementing type's name.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// Files this consumer depends on.
    fn interests(&self) -> Interests {
        Interests::all()
    }

    /// Apply the reloaded configuration.
    ///
    /// Runs on the thread that called
    /// [`Configuration::reload_configuration`] while that reload still holds
    /// its lock. Calling `reload_configuration` from here is refused and
    /// returns an empty outcome; handing it to another thread and waiting
    /// for it deadlocks.
    fn reload(&self, config: &Configuration) -> anyhow::Result<()>;
}

thread_local! {
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`Reloadable::reload`].
pub(crate) fn notifying() -> bool {
    NOTIFYING.with(Cell::get)
}

// Marks the current thread as notifying consumers until dropped.
struct NotifyingGuard {
    previous: bool,
}

impl NotifyingGuard {
    fn enter() -> Self {
        Self {
            previous: NOTIFYING.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for NotifyingGuard {
    fn drop(&mut self) {
        NOTIFYING.with(|flag| flag.set(self.previous));
    }
}

/// Registered [`Reloadable`] consumers keyed by name.
#[derive(Default)]
pub struct ReloadableRegistry {
    reloadables: DashMap<String, Arc<dyn Reloadable>>,
}

impl std::fmt::Debug for ReloadableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl ReloadableRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Returns `false` if one with the same name is
    /// already registered; the existing registration is kept.
    pub fn register(&self, reloadable: Arc<dyn Reloadable>) -> bool {
        match self.reloadables.entry(reloadable.name()) {
            Entry::Occupied(entry) => {
                debug!(reloadable = %entry.key(), "Reloadable already registered");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(reloadable);
                true
            }
        }
    }

    /// Remove a consumer by name.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Reloadable>> {
        self.reloadables.remove(name).map(|(_, r)| r)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reloadables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.reloadables.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.reloadables.is_empty()
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.reloadables.clear();
    }

    /// Notify every interested consumer, one after another.
    ///
    /// A consumer that returns an error or panics is logged and skipped;
    /// the remaining consumers are still notified.
    pub(crate) fn notify(&self, config: &Configuration, changes: &ChangeSet) -> (Vec<String>, Vec<String>) {
        // Snapshot so consumers may (de)register while being notified.
        let snapshot: Vec<(String, Arc<dyn Reloadable>)> = self
            .reloadables
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut notified = Vec::new();
        let mut failed = Vec::new();
        let _notifying = NotifyingGuard::enter();

        for (name, reloadable) in snapshot {
            if !reloadable.interests().matches(changes) {
                debug!(reloadable = %name, "Reloadable not interested in changed files");
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| reloadable.reload(config))) {
                Ok(Ok(())) => {
                    debug!(reloadable = %name, "Reloadable notified");
                    notified.push(name);
                }
                Ok(Err(e)) => {
                    error!(reloadable = %name, error = %e, "Reloadable failed to apply configuration");
                    confdir_telemetry::metrics::record_reloadable_failure(&name);
                    failed.push(name);
                }
                Err(_) => {
                    error!(reloadable = %name, "Reloadable panicked while applying configuration");
                    confdir_telemetry::metrics::record_reloadable_failure(&name);
                    failed.push(name);
                }
            }
        }

        (notified, failed)
    }
}

/// Files that differ between two scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    properties: BTreeSet<PathBuf>,
    yaml: BTreeSet<PathBuf>,
    xml: BTreeSet<PathBuf>,
}

impl ChangeSet {
    /// Compare two indices. Added, removed and modified files all count.
    pub fn between(old: &ConfigIndex, new: &ConfigIndex) -> Self {
        Self {
            properties: changed_keys(old.properties_by_file(), new.properties_by_file()),
            yaml: changed_keys(old.yaml_documents(), new.yaml_documents()),
            xml: changed_keys(old.xml_digests(), new.xml_digests()),
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.yaml.is_empty() && self.xml.is_empty()
    }

    /// Number of changed files.
    pub fn len(&self) -> usize {
        self.properties.len() + self.yaml.len() + self.xml.len()
    }

    /// All changed files.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.properties
            .iter()
            .chain(&self.yaml)
            .chain(&self.xml)
            .map(PathBuf::as_path)
    }

    /// Changed `.properties` files.
    pub fn property_files(&self) -> &BTreeSet<PathBuf> {
        &self.properties
    }

    /// Changed YAML files.
    pub fn yaml_files(&self) -> &BTreeSet<PathBuf> {
        &self.yaml
    }

    /// Changed XML files.
    pub fn xml_files(&self) -> &BTreeSet<PathBuf> {
        &self.xml
    }
}

fn changed_keys<V: PartialEq>(
    old: &HashMap<PathBuf, V>,
    new: &HashMap<PathBuf, V>,
) -> BTreeSet<PathBuf> {
    let mut changed: BTreeSet<PathBuf> = new
        .iter()
        .filter(|(path, value)| old.get(*path) != Some(*value))
        .map(|(path, _)| path.clone())
        .collect();
    changed.extend(deleted_keys(old, new));
    changed
}

fn deleted_keys<'a, K: Eq + Hash + Clone, V>(
    old: &'a HashMap<K, V>,
    new: &'a HashMap<K, V>,
) -> impl Iterator<Item = K> + 'a {
    old.keys().filter(|k| !new.contains_key(*k)).cloned()
}

/// Result of [`Configuration::reload_configuration`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// Files that changed since the previous scan.
    pub changes: ChangeSet,
    /// Consumers that applied the reload.
    pub notified: Vec<String>,
    /// Consumers that failed.
    pub failed: Vec<String>,
}

impl ReloadOutcome {
    /// Whether the reload found nothing to do.
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }

    pub(crate) fn log(&self) {
        if self.is_noop() {
            info!("No changes in configuration files detected");
        } else {
            info!(
                changed_files = self.changes.len(),
                notified = self.notified.len(),
                failed = self.failed.len(),
                "Configuration reloaded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct MailService;

    impl Reloadable for MailService {
        fn interests(&self) -> Interests {
            Interests::files(["mail.properties"])
        }

        fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Named(&'static str);

    impl Reloadable for Named {
        fn name(&self) -> String {
            self.0.to_string()
        }

        fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn changes_for(paths: &[&str]) -> ChangeSet {
        ChangeSet {
            properties: paths.iter().map(PathBuf::from).collect(),
            ..ChangeSet::default()
        }
    }

    #[test]
    fn test_default_name_is_type_name() {
        assert!(MailService.name().ends_with("MailService"));
    }

    #[test]
    fn test_interests_matching() {
        let changes = changes_for(&["/opt/etc/mail.properties"]);
        assert!(Interests::all().matches(&changes));
        assert!(Interests::files(["mail.properties"]).matches(&changes));
        assert!(!Interests::files(["server.properties"]).matches(&changes));
        assert!(!Interests::files(["ail.properties2"]).matches(&changes));
    }

    #[test]
    fn test_register_is_first_wins() {
        let registry = ReloadableRegistry::new();
        assert!(registry.register(Arc::new(Named("a"))));
        assert!(!registry.register(Arc::new(Named("a"))));
        assert!(registry.register(Arc::new(Named("b"))));
        assert_eq!(registry.names(), vec!["a", "b"]);

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_change_set_detects_modified_added_deleted() {
        let root = TempDir::new().unwrap();
        let dirs = [root.path().to_path_buf()];
        fs::write(root.path().join("keep.properties"), "a = 1\n").unwrap();
        fs::write(root.path().join("edit.properties"), "b = 1\n").unwrap();
        fs::write(root.path().join("gone.xml"), "<x/>").unwrap();
        let old = ConfigIndex::build(&dirs);

        fs::write(root.path().join("edit.properties"), "b = 2\n").unwrap();
        fs::write(root.path().join("new.yml"), "k: v\n").unwrap();
        fs::remove_file(root.path().join("gone.xml")).unwrap();
        let new = ConfigIndex::build(&dirs);

        let changes = ChangeSet::between(&old, &new);
        assert_eq!(changes.len(), 3);
        assert!(changes.property_files().contains(&root.path().join("edit.properties")));
        assert!(changes.yaml_files().contains(&root.path().join("new.yml")));
        assert!(changes.xml_files().contains(&root.path().join("gone.xml")));
        assert!(!changes.property_files().contains(&root.path().join("keep.properties")));
    }

    #[test]
    fn test_unchanged_tree_has_empty_change_set() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.properties"), "a = 1\n").unwrap();
        let dirs = [root.path().to_path_buf()];

        let changes = ChangeSet::between(&ConfigIndex::build(&dirs), &ConfigIndex::build(&dirs));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_file_order_does_not_matter() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("a.properties");
        let dirs = [root.path().to_path_buf()];
        fs::write(&path, "x = 1\ny = 2\n").unwrap();
        let old = ConfigIndex::build(&dirs);
        fs::write(&path, "y = 2\nx = 1\n").unwrap();

        assert!(ChangeSet::between(&old, &ConfigIndex::build(&dirs)).is_empty());
    }
}
