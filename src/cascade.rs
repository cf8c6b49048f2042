//! Resolution cascade
//!
//! Resolves an [`AddressQuery`] to a [`LocationRecord`]: consult the cache
//! once, then ask the provider up to [`MAX_TRIES`] times, relaxing the query
//! after every empty answer:
//!
//! | try | relaxation before the next try |
//! |-----|--------------------------------|
//! | 0→1 | force `iso_country = "DE"`     |
//! | 1→2 | clear `iso_country`            |
//! | 2→3 | clear street and street number |
//! | 3→4 | clear zipcode                  |
//! | 4   | give up                        |
//!
//! Every try shares the cache slot of the original query, and the record
//! written on success carries the original payload. Transport and decode
//! failures end the cascade immediately; only an empty answer advances it.
//!
//! Concurrent resolutions of the same uncached address are not coordinated:
//! each runs its own cascade and the last upsert wins.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use crate::cache::{LocationCache, StoreError};
use crate::data::nominatim::select_candidate;
use crate::data::{AddressQuery, Context, Coordinates, GeocodeProvider, GeocodeRequest, LocationRecord};

/// Number of provider calls a single resolution may make
pub const MAX_TRIES: u8 = 5;

/// ISO code forced on the first relaxation
pub const FALLBACK_ISO_COUNTRY: &str = "DE";

/// Query mutation applied after an empty provider answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relaxation {
    ForceFallbackCountry,
    DropCountry,
    DropStreet,
    DropZipcode,
}

impl Relaxation {
    /// The relaxation to apply after try `ordinal` came back empty
    ///
    /// `None` means the cascade is exhausted.
    pub fn after_try(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Relaxation::ForceFallbackCountry),
            1 => Some(Relaxation::DropCountry),
            2 => Some(Relaxation::DropStreet),
            3 => Some(Relaxation::DropZipcode),
            _ => None,
        }
    }

    pub fn apply(self, query: &mut AddressQuery) {
        match self {
            Relaxation::ForceFallbackCountry => query.iso_country = Some(FALLBACK_ISO_COUNTRY.to_string()),
            Relaxation::DropCountry => query.iso_country = None,
            Relaxation::DropStreet => {
                query.street = None;
                query.street_number = None;
            }
            Relaxation::DropZipcode => query.zipcode = None,
        }
    }
}

/// Runs the cache lookup and the provider cascade
#[derive(Clone)]
pub struct Resolver {
    cache: LocationCache,
    provider: Arc<dyn GeocodeProvider>,
}

impl Resolver {
    pub fn new(cache: LocationCache, provider: Arc<dyn GeocodeProvider>) -> Self {
        Self { cache, provider }
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Resolves `query`, searching within `iso_codes` when the query names no country
    ///
    /// Returns `Ok(None)` when the query is empty, when the provider failed
    /// (logged) or when every try came back empty. Store failures are errors.
    pub async fn resolve(
        &self,
        ctx: &Context,
        query: &AddressQuery,
        iso_codes: &[String],
    ) -> Result<Option<LocationRecord>, StoreError> {
        let original = query.normalized();
        if original.is_empty() {
            debug!("nothing to resolve in an empty address query");
            return Ok(None);
        }

        let key = original.cache_key();
        if let Some(hit) = self.cache.lookup(ctx, &key, Utc::now()).await? {
            return Ok(Some(hit));
        }

        if let Some(coords) = original.raw_coords {
            debug!(key = %key, lat = coords.lat, lon = coords.lon, "caching raw coordinates");
            return self.store(ctx, original, coords).await.map(Some);
        }

        let mut attempt = original.clone();
        for ordinal in 0..MAX_TRIES {
            let request = GeocodeRequest::from_query(&attempt, iso_codes);

            let candidates = match self.provider.geocode(&request).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    error!(
                        try_ordinal = ordinal,
                        street = ?attempt.street,
                        street_number = ?attempt.street_number,
                        zipcode = ?attempt.zipcode,
                        city = ?attempt.city,
                        iso = ?attempt.iso_country,
                        country_ids = ?attempt.country_ids,
                        "Error get location by address: {}",
                        err
                    );
                    return Ok(None);
                }
            };

            if let Some(chosen) = select_candidate(&candidates, &request.countrycodes) {
                debug!(key = %key, try_ordinal = ordinal, "provider matched");
                let coords = Coordinates::new(chosen.lat, chosen.lon);
                return self.store(ctx, original, coords).await.map(Some);
            }

            match Relaxation::after_try(ordinal) {
                Some(relaxation) => {
                    debug!(key = %key, try_ordinal = ordinal, ?relaxation, "no match, relaxing query");
                    relaxation.apply(&mut attempt);
                }
                None => break,
            }
        }

        debug!(key = %key, "no match after {} tries", MAX_TRIES);
        Ok(None)
    }

    /// Upserts the original payload at its own cache slot
    async fn store(
        &self,
        ctx: &Context,
        original: AddressQuery,
        coords: Coordinates,
    ) -> Result<LocationRecord, StoreError> {
        let record = LocationRecord::new(original.cache_key(), original, coords, Utc::now());
        self.cache.upsert(ctx, &record).await?;
        Ok(record)
    }
}
