//! Integration tests for scanning, reloading and change notification.
//!
//! Every test builds its own configuration tree in a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use confdir::provider::{PREFERENCE_PATH, PROTECTED};
use confdir::{
    ConfigError, Configuration, FileChangeEvent, FileChangeKind, Interests, PropertyEvent,
    PropertyEventKind, PropertyListener, Reloadable,
};
use parking_lot::Mutex;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

fn configuration(root: &TempDir) -> Configuration {
    Configuration::new(vec![root.path().to_path_buf()]).unwrap()
}

/// Counts reloads; interested in the given file names (none means all).
struct Counter {
    name: &'static str,
    files: Vec<&'static str>,
    calls: AtomicUsize,
}

impl Counter {
    fn new(name: &'static str, files: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            files: files.to_vec(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reloadable for Counter {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn interests(&self) -> Interests {
        Interests::files(self.files.iter().copied())
    }

    fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_last_processed_file_wins() {
    let root = TempDir::new().unwrap();
    write(root.path(), "10-base.properties", "com.example.mode = base\n");
    write(root.path(), "20-override.properties", "com.example.mode = override\n");

    let config = configuration(&root);
    assert_eq!(config.property("com.example.mode").as_deref(), Some("override"));
}

#[test]
fn test_missing_directory_fails_construction() {
    let root = TempDir::new().unwrap();
    let result = Configuration::new(vec![root.path().to_path_buf(), root.path().join("absent")]);
    assert!(matches!(result, Err(ConfigError::InvalidDirectory { .. })));

    let file = write(root.path(), "plain.properties", "a = 1\n");
    assert!(matches!(
        Configuration::new(vec![file]),
        Err(ConfigError::InvalidDirectory { .. })
    ));
}

#[test]
fn test_reload_without_changes_notifies_nobody() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "server.properties", "a = 1\n");
    let config = configuration(&root);
    let generic = Counter::new("generic", &[]);
    config.register_reloadable(generic.clone());

    assert!(config.reload_configuration().is_noop());
    assert_eq!(generic.calls(), 0);

    fs::write(&path, "a = 2\n").unwrap();
    let outcome = config.reload_configuration();
    assert!(!outcome.is_noop());
    assert_eq!(generic.calls(), 1);

    let outcome = config.reload_configuration();
    assert!(outcome.is_noop());
    assert!(outcome.notified.is_empty());
    assert_eq!(generic.calls(), 1);
    assert_eq!(config.property("a").as_deref(), Some("2"));
}

#[test]
fn test_only_interested_reloadables_are_notified() {
    let root = TempDir::new().unwrap();
    let mail = write(root.path(), "mail.properties", "mail.host = imap1\n");
    write(root.path(), "server.properties", "server.name = ox\n");
    let config = configuration(&root);

    let mail_consumer = Counter::new("mail", &["mail.properties"]);
    let server_consumer = Counter::new("server", &["server.properties"]);
    let generic = Counter::new("generic", &[]);
    for consumer in [&mail_consumer, &server_consumer, &generic] {
        assert!(config.register_reloadable(consumer.clone()));
    }

    fs::write(&mail, "mail.host = imap2\n").unwrap();
    let outcome = config.reload_configuration();

    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(mail_consumer.calls(), 1);
    assert_eq!(generic.calls(), 1);
    assert_eq!(server_consumer.calls(), 0);
    let mut notified = outcome.notified.clone();
    notified.sort();
    assert_eq!(notified, vec!["generic", "mail"]);
}

#[test]
fn test_yaml_and_xml_changes_are_detected() {
    let root = TempDir::new().unwrap();
    let yaml = write(root.path(), "features.yml", "beta: false\n");
    let xml = write(root.path(), "cache.xml", "<cache/>");
    let config = configuration(&root);
    let features = Counter::new("features", &["features.yml"]);
    let cache = Counter::new("cache", &["cache.xml"]);
    config.register_reloadable(features.clone());
    config.register_reloadable(cache.clone());

    fs::write(&yaml, "beta: true\n").unwrap();
    config.reload_configuration();
    assert_eq!((features.calls(), cache.calls()), (1, 0));

    fs::write(&xml, "<cache size=\"10\"/>").unwrap();
    config.reload_configuration();
    assert_eq!((features.calls(), cache.calls()), (1, 1));
}

#[test]
fn test_deleted_file_counts_as_change() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "old.properties", "legacy = 1\n");
    let config = configuration(&root);
    let consumer = Counter::new("old", &["old.properties"]);
    config.register_reloadable(consumer.clone());

    fs::remove_file(&path).unwrap();
    let outcome = config.reload_configuration();

    assert!(outcome.changes.property_files().contains(&path));
    assert_eq!(consumer.calls(), 1);
    assert_eq!(config.property("legacy"), None);
}

#[test]
fn test_unparseable_file_makes_properties_absent() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "imap.properties", "imap.port = 143\n");
    let config = configuration(&root);
    assert_eq!(config.int_property("imap.port", 0), 143);

    fs::write(&path, "imap.port = 993\nbroken = \\u12\n").unwrap();
    let outcome = config.reload_configuration();

    assert!(!outcome.is_noop());
    assert_eq!(config.property("imap.port"), None);
    assert_eq!(config.int_property("imap.port", 0), 0);
}

struct Failing;

impl Reloadable for Failing {
    fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
        anyhow::bail!("cannot apply")
    }
}

struct Panicking;

impl Reloadable for Panicking {
    fn reload(&self, _config: &Configuration) -> anyhow::Result<()> {
        panic!("consumer bug")
    }
}

#[test]
fn test_failing_consumers_do_not_stop_the_others() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "a.properties", "a = 1\n");
    let config = configuration(&root);
    let healthy = Counter::new("healthy", &[]);
    config.register_reloadable(Arc::new(Failing));
    config.register_reloadable(Arc::new(Panicking));
    config.register_reloadable(healthy.clone());

    fs::write(&path, "a = 2\n").unwrap();
    let outcome = config.reload_configuration();

    assert_eq!(healthy.calls(), 1);
    assert_eq!(outcome.notified, vec!["healthy"]);
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(config.property("a").as_deref(), Some("2"));
}

#[test]
fn test_register_and_remove_reloadable() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "a.properties", "a = 1\n");
    let config = configuration(&root);
    let consumer = Counter::new("consumer", &[]);

    assert!(config.register_reloadable(consumer.clone()));
    assert!(!config.register_reloadable(Counter::new("consumer", &[])));
    assert!(config.remove_reloadable("consumer"));
    assert!(!config.remove_reloadable("consumer"));

    fs::write(&path, "a = 2\n").unwrap();
    config.reload_configuration();
    assert_eq!(consumer.calls(), 0);
}

#[derive(Default)]
struct Recorder(Mutex<Vec<PropertyEvent>>);

impl PropertyListener for Recorder {
    fn on_property_change(&self, event: &PropertyEvent) {
        self.0.lock().push(event.clone());
    }
}

#[derive(Default)]
struct SecondRecorder(Mutex<Vec<PropertyEvent>>);

impl PropertyListener for SecondRecorder {
    fn on_property_change(&self, event: &PropertyEvent) {
        self.0.lock().push(event.clone());
    }
}

#[test]
fn test_deleting_watched_file_notifies_once() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "mail.properties", "mail.host = imap\n");
    let config = configuration(&root);

    let first = Arc::new(Recorder::default());
    let second = Arc::new(SecondRecorder::default());
    assert_eq!(config.property_with_listener("mail.host", "", first.clone()), "imap");
    config.property_with_listener("mail.host", "", second.clone());

    fs::remove_file(&path).unwrap();
    config
        .watchers()
        .dispatch(&FileChangeEvent::new(&path, FileChangeKind::Deleted));

    for events in [first.0.lock().clone(), second.0.lock().clone()] {
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PropertyEventKind::Delete);
        assert_eq!(events[0].value, None);
    }
    assert_eq!(config.watchers().get("mail.host").unwrap().value(), None);
}

#[test]
fn test_watched_property_change_and_unwatch() {
    let root = TempDir::new().unwrap();
    let path = write(root.path(), "mail.properties", "mail.host = imap\nother = x\n");
    let config = configuration(&root);
    let listener = Arc::new(Recorder::default());
    config.property_with_listener("mail.host", "", listener.clone());

    fs::write(&path, "mail.host = IMAP\nother = y\n").unwrap();
    config
        .watchers()
        .dispatch(&FileChangeEvent::new(&path, FileChangeKind::Modified));
    assert!(listener.0.lock().is_empty());

    fs::write(&path, "mail.host = smtp\n").unwrap();
    config
        .watchers()
        .dispatch(&FileChangeEvent::new(&path, FileChangeKind::Modified));
    {
        let events = listener.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PropertyEventKind::Change);
        assert_eq!(events[0].value.as_deref(), Some("smtp"));
    }

    assert!(config.remove_property_listener::<Recorder>("mail.host"));
    assert!(config.watchers().is_empty());
}

#[test]
fn test_undefined_property_is_not_watched() {
    let root = TempDir::new().unwrap();
    let config = configuration(&root);
    let value = config.property_with_listener("nothing", "fallback", Arc::new(Recorder::default()));
    assert_eq!(value, "fallback");
    assert!(config.watchers().is_empty());
}

#[test]
fn test_provider_merges_settings_and_meta() {
    let root = TempDir::new().unwrap();
    write(root.path(), "settings/ui.properties", "ui/theme = dark\n");
    write(root.path(), "settings/ui.yml", "ui:\n  layout:\n    columns: 3\n");
    let config = configuration(&root);

    let theme = config.provider().get("ui/theme", 1, 1);
    assert_eq!(theme.metadata_value(PREFERENCE_PATH), Some("ui/theme"));
    assert_eq!(theme.metadata_value(PROTECTED), Some("true"));
    assert_eq!(config.provider().get("ui/layout/columns", 1, 1).value(), Some("3"));

    write(
        root.path(),
        "meta/ui.yml",
        "ui/theme:\n  protected: false\n  final: user\nui/layout/columns: 4\n",
    );
    let outcome = config.reload_configuration();
    assert!(!outcome.is_noop());

    let theme = config.provider().get("ui/theme", 1, 1);
    assert_eq!(theme.value(), Some("dark"));
    assert_eq!(theme.metadata_value(PROTECTED), Some("false"));
    assert_eq!(theme.metadata_value("final"), Some("user"));
    assert_eq!(theme.metadata_value(PREFERENCE_PATH), Some("ui/theme"));

    // Not a map: left alone, sibling entries still applied.
    let columns = config.provider().get("ui/layout/columns", 1, 1);
    assert_eq!(columns.value(), Some("3"));
    assert_eq!(columns.metadata_value("final"), None);
}

#[test]
fn test_multiple_roots_in_order() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "z.properties", "shared = first\nonly.first = 1\n");
    write(second.path(), "a.properties", "shared = second\n");

    let config = Configuration::new(vec![
        first.path().to_path_buf(),
        second.path().to_path_buf(),
    ])
    .unwrap();

    assert_eq!(config.directories().len(), 2);
    assert_eq!(config.property("shared").as_deref(), Some("second"));
    assert_eq!(config.property("only.first").as_deref(), Some("1"));
}
