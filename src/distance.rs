//! Point-to-set distance materialization
//!
//! Computes the great-circle distance from a resolved location to every
//! active record of a target collection and persists one row per pair.
//! Distances are stored in kilometres; conversion happens on read.
//! Materialization is always explicit: nothing re-runs it when a location or
//! a target changes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::cache::{DistanceStore, StoreError};
use crate::data::{CacheKey, Context, DistanceCacheRow, DistanceUnit, LocationRecord, Target};

/// Mean earth radius used by the distance formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres (spherical law of cosines)
///
/// Rounding can push the `acos` argument just outside `[-1, 1]` for nearly
/// identical points; the argument is clamped and any non-finite result
/// becomes `0`.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }

    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let cos_angle = lat1.cos() * lat2.cos() * (lon2 - lon1).cos() + lat1.sin() * lat2.sin();
    let distance = EARTH_RADIUS_KM * cos_angle.clamp(-1.0, 1.0).acos();

    if distance.is_finite() {
        distance.max(0.0)
    } else {
        0.0
    }
}

/// Source of target collections by name
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Returns every record of `collection`, active or not
    async fn targets(&self, ctx: &Context, collection: &str) -> Result<Vec<Target>, StoreError>;
}

#[async_trait]
impl TargetSource for HashMap<String, Vec<Target>> {
    async fn targets(&self, _ctx: &Context, collection: &str) -> Result<Vec<Target>, StoreError> {
        Ok(self.get(collection).cloned().unwrap_or_default())
    }
}

/// A target's distance as seen by a reader
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyTarget {
    pub target_id: String,
    /// Distance expressed in `unit`
    pub distance: f64,
    pub unit: DistanceUnit,
}

/// Computes and stores distances from a location to a target set
#[derive(Clone)]
pub struct DistanceMaterializer {
    store: Arc<dyn DistanceStore>,
}

impl DistanceMaterializer {
    pub fn new(store: Arc<dyn DistanceStore>) -> Self {
        Self { store }
    }

    /// Computes the distance to every active target and upserts the rows
    ///
    /// Returns the rows written, in target order.
    pub async fn materialize(
        &self,
        ctx: &Context,
        location: &LocationRecord,
        targets: &[Target],
    ) -> Result<Vec<DistanceCacheRow>, StoreError> {
        let now = Utc::now();
        let rows: Vec<DistanceCacheRow> = targets
            .iter()
            .filter(|target| target.active)
            .map(|target| DistanceCacheRow {
                location_id: location.id.clone(),
                target_id: target.id.clone(),
                distance_km: haversine(location.lat, location.lon, target.lat, target.lon),
                created_at: now,
            })
            .collect();

        self.store.upsert_distances(ctx, &rows).await?;
        debug!(
            location = %location.id,
            written = rows.len(),
            skipped = targets.len() - rows.len(),
            "distances materialized"
        );
        Ok(rows)
    }

    /// Reads the stored distances for `location_id`, nearest first
    ///
    /// `radius` is in `unit`; `None` or a non-positive radius returns every row.
    pub async fn nearby(
        &self,
        ctx: &Context,
        location_id: &CacheKey,
        radius: Option<f64>,
        unit: DistanceUnit,
    ) -> Result<Vec<NearbyTarget>, StoreError> {
        let radius = radius.filter(|r| *r > 0.0);
        let mut nearby: Vec<NearbyTarget> = self
            .store
            .distances_for(ctx, location_id)
            .await?
            .into_iter()
            .map(|row| NearbyTarget {
                distance: row.distance_in(unit),
                target_id: row.target_id,
                unit,
            })
            .filter(|t| radius.map_or(true, |r| t.distance <= r))
            .collect();

        nearby.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        Ok(nearby)
    }

    /// Removes every distance row unconditionally
    pub async fn clear(&self, ctx: &Context) -> Result<(), StoreError> {
        self.store.clear_distances(ctx).await?;
        info!(tenant = %ctx.tenant_id, "distance cache cleared");
        Ok(())
    }
}
