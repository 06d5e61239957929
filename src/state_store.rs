//! Persistent state between plugin invocations.
//!
//! Every poll is a fresh process, so the raw counter values of the previous
//! run live in a small JSON file per plugin configuration. Files are replaced
//! atomically (temp file in the same directory + rename), so a concurrent
//! reader sees either the old or the new set, never a mix.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::reading::CacheEntry;

/// On-disk format version. Files with any other version are ignored.
const CACHE_FORMAT_VERSION: u32 = 1;

/// File name prefix for derived cache paths.
const CACHE_FILE_PREFIX: &str = "metric-plugin-";

/// Cached entries keyed by metric name.
pub type CacheSet = BTreeMap<String, CacheEntry>;

/// Stable identifier of one plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from the plugin name and its normalized configuration.
    ///
    /// Parts are trimmed and joined with NUL before hashing, so moving a
    /// separator between parts changes the key.
    pub fn derive(plugin: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(plugin.as_bytes());
        for part in parts {
            hasher.update([0u8]);
            hasher.update(part.trim().as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Self(format!("{}-{}", sanitize(plugin), &digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keeps plugin names usable as file name components.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: CacheSet,
}

/// Reads and writes cache files under a base directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    base_dir: PathBuf,
    /// Explicit file that replaces the derived path (multi-instance setups).
    file_override: Option<PathBuf>,
}

impl StateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_override: None,
        }
    }

    /// Uses `path` for every key instead of the derived location.
    pub fn with_file_override(mut self, path: Option<PathBuf>) -> Self {
        self.file_override = path;
        self
    }

    /// Location of the cache file for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        match &self.file_override {
            Some(path) => path.clone(),
            None => self
                .base_dir
                .join(format!("{}{}.json", CACHE_FILE_PREFIX, key.as_str())),
        }
    }

    /// Loads the previous entries for `key`.
    ///
    /// Never fails: a missing, unreadable or corrupt file yields an empty
    /// set and `found == false`.
    pub fn load(&self, key: &CacheKey) -> (CacheSet, bool) {
        let path = self.path_for(key);

        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file at {} yet", path.display());
                return (CacheSet::new(), false);
            }
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                return (CacheSet::new(), false);
            }
        };

        match decode(&content) {
            Some(entries) => {
                debug!("Loaded {} cache entries from {}", entries.len(), path.display());
                (entries, true)
            }
            None => {
                warn!("Ignoring corrupt cache file {}", path.display());
                (CacheSet::new(), false)
            }
        }
    }

    /// Replaces the cache file for `key` with `entries`.
    pub fn save(&self, key: &CacheKey, entries: &CacheSet) -> Result<(), StoreError> {
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: entries.clone(),
        };
        let encoded = serde_json::to_vec(&file)?;
        let path = self.path_for(key);
        write_atomic(&path, &encoded)?;
        debug!("Saved {} cache entries to {}", entries.len(), path.display());
        Ok(())
    }
}

fn decode(content: &[u8]) -> Option<CacheSet> {
    let file: CacheFile = serde_json::from_slice(content).ok()?;
    if file.version != CACHE_FORMAT_VERSION {
        return None;
    }
    if file.entries.iter().any(|(name, entry)| *name != entry.name) {
        return None;
    }
    Some(file.entries)
}

/// Writes `contents` to `path` so that readers only ever see a complete file.
///
/// The data goes to a temporary file in the target directory, is synced, and
/// is then renamed over `path`. If anything fails before the rename the
/// temporary file is removed and `path` is untouched.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}
