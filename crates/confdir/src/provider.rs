//! Server-scope view of the configuration.
//!
//! The provider merges three sources into one `name -> ServerProperty` cache,
//! in increasing precedence:
//!
//! 1. `.properties` files below `<root>/settings`
//! 2. YAML documents below `<root>/settings`, flattened to slash-joined keys
//! 3. YAML documents below `<root>/meta`, whose top-level keys name a property
//!    and whose values are metadata maps merged over whatever is already cached
//!
//! Published [`ServerProperty`] values are immutable. Updates build a new
//! property and install it with a compare-and-swap on the cache entry.

use std::backtrace::Backtrace;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, enabled, warn, Level};

use crate::index::ConfigIndex;
use crate::yaml::{flatten, YamlValue};

/// Scope identifier served by [`ServerConfigProvider`].
pub const SCOPE: &str = "server";

/// Default prefix of capability properties.
pub const DEFAULT_CAPABILITY_PREFIX: &str = "com.openexchange.capability.";

/// Metadata key holding the preference tree path of a settings property.
pub const PREFERENCE_PATH: &str = "preferencePath";

/// Metadata key marking a property as not changeable by users.
pub const PROTECTED: &str = "protected";

/// Folder below each root holding settings files.
pub const SETTINGS_FOLDER: &str = "settings";

/// Folder below each root holding metadata YAML files.
pub const META_FOLDER: &str = "meta";

/// A property value with its metadata, as seen in the server scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProperty {
    value: Option<String>,
    metadata: Arc<BTreeMap<String, String>>,
}

impl ServerProperty {
    /// Create a property.
    pub fn new(value: Option<String>, metadata: BTreeMap<String, String>) -> Self {
        Self {
            value,
            metadata: Arc::new(metadata),
        }
    }

    /// A protected property without further metadata.
    pub fn protected(value: Option<String>) -> Self {
        Self::new(value, protected_metadata())
    }

    /// The value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// All metadata.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// A single metadata entry.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Whether the property is marked protected.
    pub fn is_protected(&self) -> bool {
        self.metadata_value(PROTECTED)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// A copy with `extra` merged over the existing metadata.
    #[must_use]
    pub fn with_metadata(&self, extra: &BTreeMap<String, String>) -> Self {
        let mut metadata = (*self.metadata).clone();
        metadata.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            value: self.value.clone(),
            metadata: Arc::new(metadata),
        }
    }
}

fn protected_metadata() -> BTreeMap<String, String> {
    BTreeMap::from([(PROTECTED.to_string(), "true".to_string())])
}

fn settings_metadata(name: &str) -> BTreeMap<String, String> {
    let mut metadata = protected_metadata();
    metadata.insert(PREFERENCE_PATH.to_string(), name.to_string());
    metadata
}

/// Provider of the `server` scope.
pub struct ServerConfigProvider {
    dirs: Vec<PathBuf>,
    capability_prefix: String,
    source: RwLock<Arc<ConfigIndex>>,
    cache: DashMap<String, Arc<ServerProperty>>,
}

impl std::fmt::Debug for ServerConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfigProvider")
            .field("dirs", &self.dirs)
            .field("capability_prefix", &self.capability_prefix)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl ServerConfigProvider {
    /// Build the provider from an index scanned from `dirs`.
    pub fn new(dirs: &[PathBuf], index: Arc<ConfigIndex>, capability_prefix: impl Into<String>) -> Self {
        let provider = Self {
            dirs: dirs.to_vec(),
            capability_prefix: capability_prefix.into(),
            source: RwLock::new(Arc::clone(&index)),
            cache: DashMap::new(),
        };
        provider.reinit(index);
        provider
    }

    /// The scope this provider serves.
    pub fn scope(&self) -> &'static str {
        SCOPE
    }

    /// Look up a property.
    ///
    /// Properties not derived from the settings or meta folders are taken
    /// from the raw configuration, marked protected and cached. Concurrent
    /// first lookups agree on a single cached instance.
    pub fn get(&self, name: &str, context_id: i32, user_id: i32) -> Arc<ServerProperty> {
        if let Some(cached) = self.cache.get(name) {
            return Arc::clone(cached.value());
        }

        let value = self.source.read().property(name).map(str::to_string);
        if value.is_none()
            && name.starts_with(&self.capability_prefix)
            && enabled!(Level::DEBUG)
        {
            debug!(
                property = %name,
                context_id,
                user_id,
                backtrace = %Backtrace::force_capture(),
                "Capability property has no value"
            );
        }

        let property = Arc::new(ServerProperty::protected(value));
        Arc::clone(self.cache.entry(name.to_string()).or_insert(property).value())
    }

    /// Names of all properties visible in this scope.
    pub fn property_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.source.read().properties().keys().cloned().collect();
        names.extend(self.cache.iter().map(|entry| entry.key().clone()));
        names
    }

    /// Number of cached properties.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop the cache and derive it again from `index`.
    pub fn reinit(&self, index: Arc<ConfigIndex>) {
        *self.source.write() = Arc::clone(&index);
        self.cache.clear();

        let settings = self.folder(SETTINGS_FOLDER);
        for (name, value) in index.properties_under(&settings) {
            let metadata = settings_metadata(&name);
            self.cache
                .insert(name, Arc::new(ServerProperty::new(Some(value), metadata)));
        }
        for doc in index.yaml_under(&settings).values() {
            for (name, value) in flatten(doc) {
                let metadata = settings_metadata(&name);
                self.cache
                    .insert(name, Arc::new(ServerProperty::new(Some(value), metadata)));
            }
        }

        for (path, doc) in index.yaml_under(&self.folder(META_FOLDER)) {
            let Some(entries) = doc.as_mapping() else {
                warn!(
                    path = %path.display(),
                    kind = doc.kind(),
                    "Ignoring meta file whose root is not a mapping"
                );
                continue;
            };
            for (name, meta) in entries {
                match meta_map(meta) {
                    Some(extra) => self.merge_metadata(name, &extra, &index),
                    None => warn!(
                        path = %path.display(),
                        property = %name,
                        "Invalid meta entry of type {}, expected:\n{name}:\n    <key>: <value>\n    ...",
                        meta.kind()
                    ),
                }
            }
        }

        debug!(scope = SCOPE, properties = self.cache.len(), "Config provider initialized");
    }

    // Merges `extra` into the cached property, retrying when another writer
    // replaced the entry between reading it and writing the merge.
    fn merge_metadata(&self, name: &str, extra: &BTreeMap<String, String>, index: &ConfigIndex) {
        loop {
            let current = self.cache.get(name).map(|entry| Arc::clone(entry.value()));
            let merged = Arc::new(match &current {
                Some(existing) => existing.with_metadata(extra),
                None => ServerProperty::protected(index.property(name).map(str::to_string))
                    .with_metadata(extra),
            });

            match (self.cache.entry(name.to_string()), &current) {
                (Entry::Occupied(mut entry), Some(seen)) if Arc::ptr_eq(entry.get(), seen) => {
                    entry.insert(merged);
                    return;
                }
                (Entry::Vacant(entry), None) => {
                    entry.insert(merged);
                    return;
                }
                _ => debug!(property = %name, "Concurrent metadata update, retrying merge"),
            }
        }
    }

    fn folder(&self, name: &str) -> Vec<PathBuf> {
        self.dirs.iter().map(|dir| dir.join(name)).collect()
    }
}

fn meta_map(meta: &YamlValue) -> Option<BTreeMap<String, String>> {
    let map = meta.as_mapping()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.to_text().map(|text| (k.clone(), text)))
            .collect(),
    )
}
