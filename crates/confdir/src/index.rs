//! In-memory configuration index.
//!
//! A [`ConfigIndex`] is the result of one full scan of the configuration
//! directories. It is built from scratch on startup and on every reload and
//! never modified once published.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::properties::{load_properties_file, Properties};
use crate::scanner::{
    scan_directory, FileProcessor, PropertyFileFilter, XmlFileFilter, YamlFileFilter,
};
use crate::yaml::{load_yaml_file, YamlValue};

/// SHA-256 digest of an XML file's bytes.
pub type XmlDigest = [u8; 32];

/// Everything loaded by one scan of the configuration directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigIndex {
    properties: HashMap<String, String>,
    property_files: HashMap<String, PathBuf>,
    properties_by_file: HashMap<PathBuf, Properties>,
    yaml_by_path: HashMap<PathBuf, YamlValue>,
    yaml_by_name: HashMap<String, PathBuf>,
    yaml_by_stem: HashMap<String, PathBuf>,
    xml_digests: HashMap<PathBuf, XmlDigest>,
}

impl ConfigIndex {
    /// Scan `dirs` in order, running the properties, YAML and XML passes
    /// for each directory before moving on to the next one.
    pub fn build(dirs: &[PathBuf]) -> Self {
        let mut index = Self::default();
        for dir in dirs {
            scan_directory(dir, &PropertyFileFilter, &mut PropertyLoader(&mut index));
            scan_directory(dir, &YamlFileFilter, &mut YamlLoader(&mut index));
            scan_directory(dir, &XmlFileFilter, &mut XmlHasher(&mut index));
        }
        debug!(
            properties = index.properties.len(),
            property_files = index.properties_by_file.len(),
            yaml_files = index.yaml_by_path.len(),
            xml_files = index.xml_digests.len(),
            "Configuration index built"
        );
        index
    }

    /// Value of a property.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// File that supplied the current value of a property.
    pub fn property_file(&self, name: &str) -> Option<&Path> {
        self.property_files.get(name).map(PathBuf::as_path)
    }

    /// All properties.
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Properties loaded from each file.
    pub fn properties_by_file(&self) -> &HashMap<PathBuf, Properties> {
        &self.properties_by_file
    }

    /// Properties whose value currently comes from a file below one of `prefixes`.
    pub fn properties_under(&self, prefixes: &[PathBuf]) -> BTreeMap<String, String> {
        self.property_files
            .iter()
            .filter(|(_, file)| prefixes.iter().any(|p| file.starts_with(p)))
            .filter_map(|(name, _)| {
                self.properties
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }

    /// All parsed YAML documents keyed by path.
    pub fn yaml_documents(&self) -> &HashMap<PathBuf, YamlValue> {
        &self.yaml_by_path
    }

    /// YAML document by file name, with or without the `.yml`/`.yaml` suffix.
    pub fn yaml(&self, file_name: &str) -> Option<&YamlValue> {
        let path = self
            .yaml_by_name
            .get(file_name)
            .or_else(|| self.yaml_by_stem.get(file_name))?;
        self.yaml_by_path.get(path)
    }

    /// YAML documents stored below one of `prefixes`.
    pub fn yaml_under(&self, prefixes: &[PathBuf]) -> BTreeMap<PathBuf, YamlValue> {
        self.yaml_by_path
            .iter()
            .filter(|(path, _)| prefixes.iter().any(|p| path.starts_with(p)))
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect()
    }

    /// Digest of every XML file.
    pub fn xml_digests(&self) -> &HashMap<PathBuf, XmlDigest> {
        &self.xml_digests
    }

    /// Path of the properties file with the given file name.
    ///
    /// When several files share the name, the greatest path wins.
    pub fn file_by_name(&self, file_name: &str) -> Option<&Path> {
        self.properties_by_file
            .keys()
            .filter(|path| path.file_name().and_then(|n| n.to_str()) == Some(file_name))
            .max()
            .map(PathBuf::as_path)
    }

    fn insert_property(&mut self, name: String, value: String, file: &Path) {
        if let Some(previous) = self.properties.get(&name) {
            if previous != &value {
                debug!(
                    property = %name,
                    previous_file = ?self.property_files.get(&name),
                    file = %file.display(),
                    "Property overwritten with a different value"
                );
            }
        }
        self.property_files.insert(name.clone(), file.to_path_buf());
        self.properties.insert(name, value);
    }
}

struct PropertyLoader<'a>(&'a mut ConfigIndex);

impl FileProcessor for PropertyLoader<'_> {
    fn process(&mut self, path: &Path) {
        let loaded = match load_properties_file(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable properties file");
                return;
            }
        };
        for (name, value) in &loaded {
            self.0.insert_property(name.clone(), value.clone(), path);
        }
        self.0.properties_by_file.insert(path.to_path_buf(), loaded);
    }
}

struct YamlLoader<'a>(&'a mut ConfigIndex);

impl FileProcessor for YamlLoader<'_> {
    fn process(&mut self, path: &Path) {
        let doc = match load_yaml_file(path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparseable YAML file");
                return;
            }
        };
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.0.yaml_by_name.insert(name.to_string(), path.to_path_buf());
        }
        if let Some(stem) = path.file_stem().and_then(|n| n.to_str()) {
            self.0.yaml_by_stem.insert(stem.to_string(), path.to_path_buf());
        }
        self.0.yaml_by_path.insert(path.to_path_buf(), doc);
    }
}

struct XmlHasher<'a>(&'a mut ConfigIndex);

impl FileProcessor for XmlHasher<'_> {
    fn process(&mut self, path: &Path) {
        match fs::read(path) {
            Ok(bytes) => {
                let mut digest: XmlDigest = [0; 32];
                digest.copy_from_slice(&Sha256::digest(&bytes));
                self.0.xml_digests.insert(path.to_path_buf(), digest);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable XML file");
            }
        }
    }
}
