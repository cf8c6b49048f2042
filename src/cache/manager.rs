//! File-backed store persisting locations and distances as JSON
//!
//! Layout under the cache directory:
//!
//! ```text
//! locations/<partition>/<cache key>.json
//! distances/<partition>/<location id>.json
//! ```
//!
//! One file per location record and one file per location's distance rows.
//! Clearing a store removes its whole subtree.
//!
//! Every write goes through its own temp file and is renamed into place.
//! Distance files are read, merged and rewritten under a per-file lock shared
//! by all clones of one `CacheManager`.

use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

use super::{DistanceStore, LocationStore, StoreError};
use crate::data::{CacheKey, Context, DistanceCacheRow, LocationRecord};

const LOCATIONS_DIR: &str = "locations";
const DISTANCES_DIR: &str = "distances";

/// Reads and writes cache entries as JSON files on disk
///
/// The default location is an XDG-compliant cache directory
/// (`~/.cache/geocache/` on Linux).
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    /// Read-modify-write locks for distance files
    file_locks: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl CacheManager {
    /// Creates a new CacheManager using the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "geocache")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a new CacheManager with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            file_locks: Arc::default(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn location_path(&self, ctx: &Context, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(LOCATIONS_DIR)
            .join(ctx.partition())
            .join(format!("{}.json", key))
    }

    fn distance_path(&self, ctx: &Context, location_id: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(DISTANCES_DIR)
            .join(ctx.partition())
            .join(format!("{}.json", location_id))
    }

    fn file_lock(&self, path: &Path) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self.file_locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks.entry(path.to_path_buf()).or_default().clone())
    }
}

/// Reads a JSON file, treating a missing file as `None`
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes a JSON file, creating parent directories as needed
///
/// The content goes to a uniquely named sibling temp file and is renamed into
/// place, so readers never observe a half-written entry and concurrent
/// writers never share a temp file.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    fs::create_dir_all(&parent).await?;
    let json = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(|err| StoreError::Io(std::io::Error::other(err)))?
}

/// Removes a directory tree, ignoring one that does not exist
async fn remove_tree(path: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl LocationStore for CacheManager {
    async fn lookup(&self, ctx: &Context, key: &CacheKey) -> Result<Option<LocationRecord>, StoreError> {
        read_json(&self.location_path(ctx, key)).await
    }

    async fn upsert(&self, ctx: &Context, record: &LocationRecord) -> Result<(), StoreError> {
        write_json(&self.location_path(ctx, &record.id), record).await
    }

    async fn clear(&self, _ctx: &Context) -> Result<(), StoreError> {
        remove_tree(&self.cache_dir.join(LOCATIONS_DIR)).await
    }
}

#[async_trait]
impl DistanceStore for CacheManager {
    async fn upsert_distances(&self, ctx: &Context, rows: &[DistanceCacheRow]) -> Result<(), StoreError> {
        let mut by_location: BTreeMap<&CacheKey, Vec<&DistanceCacheRow>> = BTreeMap::new();
        for row in rows {
            by_location.entry(&row.location_id).or_default().push(row);
        }

        for (location_id, new_rows) in by_location {
            let path = self.distance_path(ctx, location_id);
            let lock = self.file_lock(&path)?;
            let _guard = lock.lock().await;

            let mut stored: BTreeMap<String, DistanceCacheRow> = read_json(&path).await?.unwrap_or_default();
            for row in new_rows {
                stored
                    .entry(row.target_id.clone())
                    .and_modify(|existing| existing.distance_km = row.distance_km)
                    .or_insert_with(|| row.clone());
            }
            write_json(&path, &stored).await?;
        }
        Ok(())
    }

    async fn distances_for(&self, ctx: &Context, location_id: &CacheKey) -> Result<Vec<DistanceCacheRow>, StoreError> {
        let stored: Option<BTreeMap<String, DistanceCacheRow>> =
            read_json(&self.distance_path(ctx, location_id)).await?;
        Ok(stored.map(|rows| rows.into_values().collect()).unwrap_or_default())
    }

    async fn clear_distances(&self, _ctx: &Context) -> Result<(), StoreError> {
        remove_tree(&self.cache_dir.join(DISTANCES_DIR)).await
    }
}
