//! Recursive directory scanning.
//!
//! A scan pass walks a root directory, hands every file accepted by a
//! [`FileFilter`] to a [`FileProcessor`] and descends into subdirectories.
//! Entries of each directory are visited in lexicographic order so that
//! "last file wins" override precedence is the same on every platform.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// File name that is loaded as a properties file despite having no extension.
pub const MPASSWD_FILE_NAME: &str = "mpasswd";

/// Decides which files a scan pass hands to its processor.
pub trait FileFilter {
    /// Whether `path` (a regular file) should be processed.
    fn accept(&self, path: &Path) -> bool;
}

/// Handles one accepted file during a scan pass.
pub trait FileProcessor {
    /// Process a single file. Failures are handled (logged) by the processor.
    fn process(&mut self, path: &Path);
}

/// Accepts `*.properties` files and files named `mpasswd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyFileFilter;

impl FileFilter for PropertyFileFilter {
    fn accept(&self, path: &Path) -> bool {
        has_extension(path, &["properties"])
            || path.file_name().and_then(|n| n.to_str()) == Some(MPASSWD_FILE_NAME)
    }
}

/// Accepts `*.yml` and `*.yaml` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlFileFilter;

impl FileFilter for YamlFileFilter {
    fn accept(&self, path: &Path) -> bool {
        has_extension(path, &["yml", "yaml"])
    }
}

/// Accepts `*.xml` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFileFilter;

impl FileFilter for XmlFileFilter {
    fn accept(&self, path: &Path) -> bool {
        has_extension(path, &["xml"])
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Recursively scan `dir`, processing every accepted file.
///
/// Unreadable directories and entries are logged and skipped; the scan
/// itself never fails.
pub fn scan_directory<F, P>(dir: &Path, filter: &F, processor: &mut P)
where
    F: FileFilter + ?Sized,
    P: FileProcessor + ?Sized,
{
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Cannot list configuration directory");
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Cannot read directory entry");
                None
            }
        })
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            scan_directory(&path, filter, processor);
        } else if path.is_file() && filter.accept(&path) {
            debug!(path = %path.display(), "Processing configuration file");
            processor.process(&path);
        }
    }
}

/// Check that every configured root exists and is a directory.
pub fn validate_directories(dirs: &[PathBuf]) -> ConfigResult<()> {
    for dir in dirs {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid_directory(dir, "empty path"));
        }
        if !dir.exists() {
            return Err(ConfigError::invalid_directory(dir, "does not exist"));
        }
        if !dir.is_dir() {
            return Err(ConfigError::invalid_directory(dir, "not a directory"));
        }
    }
    Ok(())
}
