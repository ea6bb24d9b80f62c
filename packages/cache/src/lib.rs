#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental parcel cache persisted as `parcels.json`.
//!
//! The cache is the record of finished work: a key present here is never
//! fetched again. It is loaded whole before a run, only ever grows, and is
//! written whole at every checkpoint using an atomic write pattern (write
//! to `<file>.tmp`, then rename) so an interrupted run leaves the previous
//! snapshot intact.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use la_parcels_models::{CacheKey, ParcelRecord};

/// Errors from loading or saving the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading, writing or renaming a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The persisted cache exists but is not valid JSON of the expected
    /// shape. Not treated as empty, since the next save would discard it.
    #[error("Corrupt parcel cache at {path}: {source}")]
    Corrupt {
        /// File that failed to parse.
        path: String,
        /// Parse error.
        source: serde_json::Error,
    },

    /// The in-memory cache could not be serialized.
    #[error("Failed to serialize parcel cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// In-memory parcel cache bound to its file on disk.
#[derive(Debug, Clone)]
pub struct ParcelCache {
    path: PathBuf,
    entries: BTreeMap<CacheKey, ParcelRecord>,
}

impl ParcelCache {
    /// Creates an empty cache that will be saved to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the cache from `path`, or returns an empty one if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file cannot be read and
    /// [`CacheError::Corrupt`] if it cannot be parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        if !path.exists() {
            log::info!("No parcel cache at {}, starting empty", path.display());
            return Ok(Self::empty(path));
        }

        let text = std::fs::read_to_string(&path).map_err(|e| CacheError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let entries = serde_json::from_str(&text).map_err(|e| CacheError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })?;

        let cache = Self { path, entries };
        log::info!(
            "Loaded {} cached parcels from {}",
            cache.len(),
            cache.path.display()
        );
        Ok(cache)
    }

    /// File the cache is saved to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `key` is already done.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Cached record for `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<&ParcelRecord> {
        self.entries.get(key)
    }

    /// All cached records in key order.
    pub fn records(&self) -> impl Iterator<Item = &ParcelRecord> {
        self.entries.values()
    }

    /// Adds a record for a key that is not yet cached. Existing entries are
    /// never replaced; returns `false` if `key` was already present.
    pub fn insert(&mut self, key: CacheKey, record: ParcelRecord) -> bool {
        match self.entries.entry(key) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Writes the whole cache to its file, replacing the previous contents
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if serialization or any file operation fails.
    pub fn save(&self) -> Result<(), CacheError> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| CacheError::Io { path, source }
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let contents = serde_json::to_string(&self.entries)?;
        let tmp_path = tmp_path(&self.path);
        std::fs::write(&tmp_path, contents).map_err(io_err(&tmp_path))?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;

        log::debug!(
            "Saved {} parcels to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Sibling temp file used for atomic saves (`parcels.json.tmp`).
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
