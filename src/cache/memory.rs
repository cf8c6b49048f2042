//! In-process store backed by hash maps

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{DistanceStore, LocationStore, StoreError};
use crate::data::{CacheKey, Context, DistanceCacheRow, LocationRecord};

type LocationSlot = (String, CacheKey);
type DistanceSlot = (String, CacheKey, String);

/// Thread-safe in-memory implementation of both store traits
///
/// Records are partitioned by [`Context::partition`]. Writers are serialized
/// by the lock; there is no coordination beyond single-entry upserts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locations: RwLock<HashMap<LocationSlot, LocationRecord>>,
    distances: RwLock<HashMap<DistanceSlot, DistanceCacheRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of location records across all contexts
    pub fn location_count(&self) -> usize {
        self.locations.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Number of distance rows across all contexts
    pub fn distance_count(&self) -> usize {
        self.distances.read().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn lookup(&self, ctx: &Context, key: &CacheKey) -> Result<Option<LocationRecord>, StoreError> {
        let locations = self.locations.read().map_err(|_| StoreError::Poisoned)?;
        Ok(locations.get(&(ctx.partition(), key.clone())).cloned())
    }

    async fn upsert(&self, ctx: &Context, record: &LocationRecord) -> Result<(), StoreError> {
        let mut locations = self.locations.write().map_err(|_| StoreError::Poisoned)?;
        locations.insert((ctx.partition(), record.id.clone()), record.clone());
        Ok(())
    }

    async fn clear(&self, _ctx: &Context) -> Result<(), StoreError> {
        self.locations.write().map_err(|_| StoreError::Poisoned)?.clear();
        Ok(())
    }
}

#[async_trait]
impl DistanceStore for MemoryStore {
    async fn upsert_distances(&self, ctx: &Context, rows: &[DistanceCacheRow]) -> Result<(), StoreError> {
        let partition = ctx.partition();
        let mut distances = self.distances.write().map_err(|_| StoreError::Poisoned)?;
        for row in rows {
            let slot = (partition.clone(), row.location_id.clone(), row.target_id.clone());
            distances
                .entry(slot)
                .and_modify(|existing| existing.distance_km = row.distance_km)
                .or_insert_with(|| row.clone());
        }
        Ok(())
    }

    async fn distances_for(&self, ctx: &Context, location_id: &CacheKey) -> Result<Vec<DistanceCacheRow>, StoreError> {
        let partition = ctx.partition();
        let distances = self.distances.read().map_err(|_| StoreError::Poisoned)?;
        let mut rows: Vec<DistanceCacheRow> = distances
            .iter()
            .filter(|((p, loc, _), _)| *p == partition && loc == location_id)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        Ok(rows)
    }

    async fn clear_distances(&self, _ctx: &Context) -> Result<(), StoreError> {
        self.distances.write().map_err(|_| StoreError::Poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AddressQuery, Coordinates};
    use chrono::{Duration, Utc};

    fn record(city: &str, lat: f64) -> LocationRecord {
        let query = AddressQuery::default().with_city(city);
        LocationRecord::new(query.cache_key(), query, Coordinates::new(lat, 13.0), Utc::now())
    }

    fn row(location: &CacheKey, target: &str, km: f64) -> DistanceCacheRow {
        DistanceCacheRow {
            location_id: location.clone(),
            target_id: target.to_string(),
            distance_km: km,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_lookup_missing_key() {
        let store = MemoryStore::new();
        let key = AddressQuery::default().with_city("Nowhere").cache_key();
        assert!(store.lookup(&Context::default(), &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_on_conflict() {
        let store = MemoryStore::new();
        let ctx = Context::default();
        let first = record("Berlin", 52.0);
        let mut second = first.clone();
        second.lat = 53.0;
        second.updated_at = first.updated_at + Duration::minutes(5);

        store.upsert(&ctx, &first).await.unwrap();
        store.upsert(&ctx, &second).await.unwrap();

        assert_eq!(store.lookup(&ctx, &first.id).await.unwrap(), Some(second));
        assert_eq!(store.location_count(), 1);
    }

    #[tokio::test]
    async fn test_contexts_are_partitioned() {
        let store = MemoryStore::new();
        let shop_a = Context::for_tenant("a");
        let shop_b = Context::for_tenant("b");
        let rec = record("Berlin", 52.0);

        store.upsert(&shop_a, &rec).await.unwrap();

        assert!(store.lookup(&shop_a, &rec.id).await.unwrap().is_some());
        assert!(store.lookup(&shop_b, &rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_similar_tenant_ids_stay_apart() {
        let store = MemoryStore::new();
        let rec = record("Berlin", 52.0);

        store.upsert(&Context::for_tenant("shop/1"), &rec).await.unwrap();

        assert!(store.lookup(&Context::for_tenant("shop_1"), &rec.id).await.unwrap().is_none());
        assert!(store.lookup(&Context::for_tenant("shop/1"), &rec.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_removes_all_contexts() {
        let store = MemoryStore::new();
        store.upsert(&Context::for_tenant("a"), &record("Berlin", 52.0)).await.unwrap();
        store.upsert(&Context::for_tenant("b"), &record("Hamburg", 53.0)).await.unwrap();

        store.clear(&Context::for_tenant("a")).await.unwrap();

        assert_eq!(store.location_count(), 0);
    }

    #[tokio::test]
    async fn test_distance_upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let ctx = Context::default();
        let location = record("Berlin", 52.0).id;
        let original = row(&location, "store-1", 10.0);
        let mut updated = row(&location, "store-1", 12.5);
        updated.created_at = original.created_at + Duration::hours(3);

        store.upsert_distances(&ctx, &[original.clone()]).await.unwrap();
        store.upsert_distances(&ctx, &[updated]).await.unwrap();

        let rows = store.distances_for(&ctx, &location).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].distance_km - 12.5).abs() < 1e-9);
        assert_eq!(rows[0].created_at, original.created_at);
    }

    #[tokio::test]
    async fn test_distances_for_filters_by_location() {
        let store = MemoryStore::new();
        let ctx = Context::default();
        let berlin = record("Berlin", 52.0).id;
        let hamburg = record("Hamburg", 53.0).id;

        store
            .upsert_distances(&ctx, &[row(&berlin, "b", 2.0), row(&berlin, "a", 1.0), row(&hamburg, "a", 3.0)])
            .await
            .unwrap();

        let rows = store.distances_for(&ctx, &berlin).await.unwrap();
        let targets: Vec<&str> = rows.iter().map(|r| r.target_id.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);

        store.clear_distances(&ctx).await.unwrap();
        assert_eq!(store.distance_count(), 0);
    }
}
