//! Cache stores for resolved locations and materialized distances
//!
//! Stores are plain keyed repositories: `lookup`, `upsert` and `clear`, with
//! no notion of freshness. [`LocationCache`] layers the staleness rule on top,
//! evaluating it at lookup time against each record's `updated_at`.
//!
//! Two implementations are provided: [`MemoryStore`] for in-process use and
//! tests, and [`CacheManager`], which persists JSON files to disk.

mod manager;
mod memory;

pub use manager::CacheManager;
pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::{CacheKey, Context, DistanceCacheRow, LocationRecord, DEFAULT_LOCATION_TTL_SECS};

/// Errors that can occur when reading or writing a store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be encoded or decoded
    #[error("Cache entry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A writer panicked while holding the store lock
    #[error("Cache store lock poisoned")]
    Poisoned,
}

/// Keyed repository of resolved locations
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Returns the record stored under `key`, stale or not
    async fn lookup(&self, ctx: &Context, key: &CacheKey) -> Result<Option<LocationRecord>, StoreError>;

    /// Inserts the record, or overwrites payload, coordinates and timestamp on conflict
    async fn upsert(&self, ctx: &Context, record: &LocationRecord) -> Result<(), StoreError>;

    /// Removes every record in every context
    async fn clear(&self, ctx: &Context) -> Result<(), StoreError>;
}

/// Keyed repository of (location, target) distance rows
#[async_trait]
pub trait DistanceStore: Send + Sync {
    /// Upserts rows keyed on `(location_id, target_id)`
    ///
    /// On conflict only the distance is overwritten; `created_at` keeps the
    /// value from the first write.
    async fn upsert_distances(&self, ctx: &Context, rows: &[DistanceCacheRow]) -> Result<(), StoreError>;

    /// Returns every row materialized for `location_id`
    async fn distances_for(&self, ctx: &Context, location_id: &CacheKey) -> Result<Vec<DistanceCacheRow>, StoreError>;

    /// Removes every row in every context
    async fn clear_distances(&self, ctx: &Context) -> Result<(), StoreError>;
}

/// Staleness-aware view over a [`LocationStore`]
#[derive(Clone)]
pub struct LocationCache {
    store: Arc<dyn LocationStore>,
    ttl: Duration,
}

impl LocationCache {
    /// Wraps `store` with the default one hour freshness window
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self {
            store,
            ttl: Duration::seconds(DEFAULT_LOCATION_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn LocationStore> {
        &self.store
    }

    /// Returns the record for `key` if it exists and is fresh at `now`
    pub async fn lookup(
        &self,
        ctx: &Context,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<Option<LocationRecord>, StoreError> {
        match self.store.lookup(ctx, key).await? {
            Some(record) if record.is_fresh_at(now, self.ttl) => {
                debug!(key = %key, "location cache hit");
                Ok(Some(record))
            }
            Some(record) => {
                debug!(key = %key, updated_at = %record.updated_at, "location cache entry is stale");
                Ok(None)
            }
            None => {
                debug!(key = %key, "location cache miss");
                Ok(None)
            }
        }
    }

    pub async fn upsert(&self, ctx: &Context, record: &LocationRecord) -> Result<(), StoreError> {
        self.store.upsert(ctx, record).await
    }

    /// Empties the whole location store
    pub async fn clear(&self, ctx: &Context) -> Result<(), StoreError> {
        self.store.clear(ctx).await?;
        info!(tenant = %ctx.tenant_id, "location cache cleared");
        Ok(())
    }
}
