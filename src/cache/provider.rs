//! File-system data cache provider
//!
//! Stores one JSON record per key in an application-scoped cache folder, with
//! typed retrieval and a time-based weed sweep.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::entry::{CachedData, EntryTimestamp};

/// File extension of cache records
const ENTRY_EXTENSION: &str = "json";

/// File extension of in-flight writes
const TEMP_EXTENSION: &str = "tmp";

/// Prefix of records named by their percent-encoded key
const KEYED_PREFIX: &str = "k-";

/// Prefix of records named by a digest of their key
const HASHED_PREFIX: &str = "h-";

/// Longest percent-encoded key used as a file name as-is. Longer keys are
/// hashed so names stay under the usual 255-byte limit.
const MAX_ENCODED_KEY_LEN: usize = 200;

/// Errors that can occur when reading or writing the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem access failed
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Content could not be serialized or deserialized
    #[error("Malformed cache content for key '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// No platform cache directory could be determined
    #[error("Could not determine a cache directory for application '{0}'")]
    NoCacheDir(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Where the cache lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Application folder name under the platform cache directory
    pub app_name: String,
    /// Sub-folder holding this cache's records
    pub folder: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_name: "madecache".to_string(),
            folder: "data".to_string(),
        }
    }
}

impl CacheConfig {
    /// Resolves the cache folder, e.g. `~/.cache/<app_name>/<folder>` on Linux.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", &self.app_name)?;
        Some(project_dirs.cache_dir().join(&self.folder))
    }
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    /// Serializes writers of the same record, keyed by file name
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Persists serializable payloads as JSON files keyed by string
///
/// Cloning is cheap and clones share the same per-key locks, so a single
/// provider can be handed to many threads or tasks.
#[derive(Debug, Clone)]
pub struct FileSystemCache {
    inner: Arc<Inner>,
}

impl FileSystemCache {
    /// Creates a provider in the platform cache directory described by `config`.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let root = config
            .cache_dir()
            .ok_or_else(|| CacheError::NoCacheDir(config.app_name.clone()))?;
        Ok(Self::with_dir(root))
    }

    /// Creates a provider rooted at a specific directory
    ///
    /// The directory is created lazily on first write.
    pub fn with_dir(root: impl Into<PathBuf>) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                root: root.into(),
                locks: DashMap::new(),
            }),
        };
        cache.cleanup();
        cache
    }

    /// Directory holding the cache records
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Stores `value` under `key`, replacing any existing record
    ///
    /// A value that serializes to JSON `null` is ignored: nothing is written and
    /// an existing record is left untouched. Returns whether a record was
    /// written.
    pub fn add_or_update<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let content = serde_json::to_value(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;

        if content.is_null() {
            debug!(key, "Ignoring null value, cache left unchanged");
            return Ok(false);
        }

        let file_name = entry_file_name(key);
        self.locked(&file_name, || {
            let path = self.inner.root.join(&file_name);
            let mut entry = CachedData::new(key, content);
            match read_record(&path, key) {
                Ok(Some(previous)) => entry = entry.with_created_at(previous.created_at),
                Ok(None) => {}
                Err(CacheError::Serialization { .. }) => {
                    warn!(key, "Overwriting unreadable cache record");
                }
                Err(e) => return Err(e),
            }
            self.write_entry(&entry, &path)
        })?;

        debug!(key, "Stored cache entry");
        Ok(true)
    }

    /// Whether a record exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).is_file()
    }

    /// Reads and deserializes the payload stored under `key`
    ///
    /// Returns `Ok(None)` when no record exists.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.get_entry(key)? else {
            debug!(key, "Cache MISS");
            return Ok(None);
        };

        debug!(key, "Cache HIT");
        let value = entry.decode().map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    /// Like [`get`](Self::get), but returns `T::default()` when no record exists.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    /// Reads the full record, including timestamps, stored under `key`.
    pub fn get_entry(&self, key: &str) -> Result<Option<CachedData>> {
        read_record(&self.entry_path(key), key)
    }

    /// Deletes the record stored under `key`
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let file_name = entry_file_name(key);
        let removed =
            self.locked(&file_name, || remove_if_exists(&self.inner.root.join(&file_name)))?;

        if removed {
            debug!(key, "Removed cache entry");
        }
        Ok(removed)
    }

    /// Removes every record whose timestamp is older than `max_age`.
    pub fn weed(&self, max_age: Duration, by: EntryTimestamp) -> Result<usize> {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(max_age) => Utc::now()
                .checked_sub_signed(max_age)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        };
        self.weed_before(cutoff, by)
    }

    /// Removes every record older than `days` days.
    pub fn weed_days(&self, days: u32, by: EntryTimestamp) -> Result<usize> {
        self.weed(Duration::from_secs(u64::from(days) * 24 * 60 * 60), by)
    }

    /// Removes every record whose timestamp is at or before `cutoff`
    ///
    /// Records strictly newer than the cutoff are kept. Records whose timestamps
    /// cannot be read are judged by the file's modification time. Returns the
    /// number of records removed.
    pub fn weed_before(&self, cutoff: DateTime<Utc>, by: EntryTimestamp) -> Result<usize> {
        let mut removed = 0;

        for path in self.entry_paths()? {
            let Some(file_name) = file_name_of(&path) else {
                continue;
            };
            if self.locked(file_name, || weed_record(&path, file_name, cutoff, by))? {
                removed += 1;
            }
        }

        info!(
            root = %self.inner.root.display(),
            %cutoff,
            removed,
            "Cache weed complete"
        );
        Ok(removed)
    }

    /// Keys of all stored records, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.entry_paths()? {
            if let Some(key) = self.key_of(&path) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entry_paths()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every record, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_paths()? {
            let Some(file_name) = file_name_of(&path) else {
                continue;
            };
            if self.locked(file_name, || remove_if_exists(&path))? {
                removed += 1;
            }
        }
        info!(root = %self.inner.root.display(), removed, "Cache cleared");
        Ok(removed)
    }

    /// Removes temp files left behind by interrupted writes.
    pub fn cleanup(&self) {
        let Ok(read_dir) = fs::read_dir(&self.inner.root) else {
            return;
        };

        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
                debug!(path = %path.display(), "Removing stale temp file");
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Path of the record for `key`.
    pub(crate) fn entry_path(&self, key: &str) -> PathBuf {
        self.inner.root.join(entry_file_name(key))
    }

    /// Runs `f` holding the lock for `file_name`, then drops the lock entry
    /// unless another caller is waiting on it.
    fn locked<R>(&self, file_name: &str, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(&self.inner.locks.entry(file_name.to_string()).or_default());
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f()
        };
        drop(lock);

        self.inner
            .locks
            .remove_if(file_name, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Paths of all record files under the root.
    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let read_dir = match fs::read_dir(&self.inner.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.is_file() && file_name_of(&path).is_some_and(is_record_name) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Recovers the key of a record, reading the record when its name is hashed.
    fn key_of(&self, path: &Path) -> Option<String> {
        let file_name = file_name_of(path)?;
        if let Some(key) = key_from_file_name(file_name) {
            return Some(key);
        }

        match read_record(path, file_name) {
            Ok(entry) => entry.map(|entry| entry.key),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable cache record");
                None
            }
        }
    }

    /// Writes a record atomically via a temp file in the same directory.
    fn write_entry(&self, entry: &CachedData, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.inner.root)?;

        let json = serde_json::to_string_pretty(entry).map_err(|source| {
            CacheError::Serialization {
                key: entry.key.clone(),
                source,
            }
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(&format!(".{}", TEMP_EXTENSION))
            .tempfile_in(&self.inner.root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;

        Ok(())
    }
}

/// File name of the record for `key`
///
/// Short keys are percent-encoded, so any string maps to a single file name
/// inside the root and distinct keys never collide. Long keys use a SHA-1 of
/// the key instead; the key itself is kept inside the record.
fn entry_file_name(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    if encoded.len() <= MAX_ENCODED_KEY_LEN {
        format!("{}{}.{}", KEYED_PREFIX, encoded, ENTRY_EXTENSION)
    } else {
        format!(
            "{}{:x}.{}",
            HASHED_PREFIX,
            Sha1::digest(key.as_bytes()),
            ENTRY_EXTENSION
        )
    }
}

fn is_record_name(file_name: &str) -> bool {
    (file_name.starts_with(KEYED_PREFIX) || file_name.starts_with(HASHED_PREFIX))
        && file_name.ends_with(&format!(".{}", ENTRY_EXTENSION))
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

/// Decodes the key from a percent-encoded record name.
fn key_from_file_name(file_name: &str) -> Option<String> {
    let encoded = file_name
        .strip_prefix(KEYED_PREFIX)?
        .strip_suffix(ENTRY_EXTENSION)?
        .strip_suffix('.')?;
    urlencoding::decode(encoded).ok().map(|key| key.into_owned())
}

/// Reads a record; `label` names it in serialization errors.
fn read_record(path: &Path, label: &str) -> Result<Option<CachedData>> {
    let Some(json) = read_if_exists(path)? else {
        return Ok(None);
    };

    let entry = serde_json::from_str(&json).map_err(|source| CacheError::Serialization {
        key: label.to_string(),
        source,
    })?;
    Ok(Some(entry))
}

/// Removes the record at `path` if it is at or before `cutoff`.
fn weed_record(
    path: &Path,
    file_name: &str,
    cutoff: DateTime<Utc>,
    by: EntryTimestamp,
) -> Result<bool> {
    let expired = match read_record(path, file_name) {
        Ok(Some(entry)) => entry.is_older_than(cutoff, by),
        // Removed concurrently
        Ok(None) => return Ok(false),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache record, using file time");
            match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified) <= cutoff,
                Err(_) => return Ok(false),
            }
        }
    };

    if expired && remove_if_exists(path)? {
        debug!(path = %path.display(), "Weeded cache entry");
        return Ok(true);
    }
    Ok(false)
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
