//! Local preference cache backends.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::SyncError;
use crate::store::entry::PreferenceEntry;

const CACHE_FORMAT_VERSION: u32 = 1;

pub type CachedEntries = IndexMap<SmolStr, PreferenceEntry>;

/// Synchronous cache backend, readable at process start.
pub trait CachePersistence: Send {
    fn load(&self) -> Result<CachedEntries, SyncError>;
    fn store(&self, entries: &CachedEntries) -> Result<(), SyncError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: CachedEntries,
}

/// JSON file cache. Writes go to a sibling temp file and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CachePersistence for FileCache {
    fn load(&self) -> Result<CachedEntries, SyncError> {
        if !self.path.exists() {
            return Ok(CachedEntries::default());
        }
        let text = fs::read_to_string(&self.path).map_err(|err| {
            SyncError::Persistence(format!("read {}: {err}", self.path.display()).into())
        })?;
        let file: CacheFile = serde_json::from_str(&text).map_err(|err| {
            SyncError::Persistence(format!("parse {}: {err}", self.path.display()).into())
        })?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(SyncError::Persistence(
                format!("unsupported cache version {}", file.version).into(),
            ));
        }
        Ok(file.entries)
    }

    fn store(&self, entries: &CachedEntries) -> Result<(), SyncError> {
        #[derive(Serialize)]
        struct CacheFileRef<'a> {
            version: u32,
            entries: &'a CachedEntries,
        }
        let text = serde_json::to_string_pretty(&CacheFileRef {
            version: CACHE_FORMAT_VERSION,
            entries,
        })?;
        let temp = self.temp_path();
        fs::write(&temp, text).map_err(|err| {
            SyncError::Persistence(format!("write {}: {err}", temp.display()).into())
        })?;
        fs::rename(&temp, &self.path).map_err(|err| {
            SyncError::Persistence(format!("rename {}: {err}", self.path.display()).into())
        })
    }
}

/// In-memory cache; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<CachedEntries>>,
    stores: Arc<Mutex<u64>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: CachedEntries) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            stores: Arc::default(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> CachedEntries {
        self.entries.lock().clone()
    }

    /// Number of `store` calls so far.
    #[must_use]
    pub fn store_count(&self) -> u64 {
        *self.stores.lock()
    }
}

impl CachePersistence for MemoryCache {
    fn load(&self) -> Result<CachedEntries, SyncError> {
        Ok(self.snapshot())
    }

    fn store(&self, entries: &CachedEntries) -> Result<(), SyncError> {
        *self.entries.lock() = entries.clone();
        *self.stores.lock() += 1;
        Ok(())
    }
}
