//! Core data models for the geocoding cache
//!
//! This module contains the address query, the cached location record and the
//! materialized distance rows, plus the provider client and country reference
//! data used to resolve them.

pub mod countries;
pub mod nominatim;

pub use countries::{Country, CountryLookup, StaticCountries};
pub use nominatim::{Candidate, GeocodeProvider, GeocodeRequest, NominatimClient, ProviderError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// How long a resolved location stays fresh
pub const DEFAULT_LOCATION_TTL_SECS: i64 = 3600;

/// Kilometres per statute mile
const KM_PER_MILE: f64 = 1.609344;

/// Execution context threaded through every store and cascade operation
///
/// Stores partition their records by context, so a tenant never reads
/// another tenant's cached locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    /// Tenant (sales channel, shop, ...) the request belongs to
    pub tenant_id: String,
    /// Data version the request reads and writes
    pub version_id: String,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            version_id: "live".to_string(),
        }
    }
}

impl Context {
    /// Creates a context for the given tenant on the live version
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    /// Filesystem- and map-safe name of this context's partition
    ///
    /// Hex SHA-256 of `tenant_id`, a NUL byte and `version_id`; distinct
    /// contexts never share a partition.
    pub fn partition(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tenant_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version_id.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// WGS84 coordinate pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A structured address to resolve
///
/// Every field is optional. The struct's field order is the canonical order
/// used when fingerprinting, so two queries with the same values always share
/// a [`CacheKey`] no matter how they were assembled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressQuery {
    /// Street name, possibly including the house number
    pub street: Option<String>,
    /// House number when kept separate from the street
    pub street_number: Option<String>,
    /// Postal code
    pub zipcode: Option<String>,
    /// City or locality name
    pub city: Option<String>,
    /// Two-letter ISO country code restricting the search
    pub iso_country: Option<String>,
    /// Country reference ids the search is scoped to
    #[serde(default)]
    pub country_ids: Vec<String>,
    /// Coordinates supplied directly by the caller, bypassing the provider
    pub raw_coords: Option<Coordinates>,
}

impl AddressQuery {
    /// Creates a query that carries only caller-supplied coordinates
    pub fn from_coords(coords: Coordinates) -> Self {
        Self {
            raw_coords: Some(coords),
            ..Self::default()
        }
    }

    pub fn with_street(mut self, street: impl Into<String>) -> Self {
        self.street = Some(street.into());
        self
    }

    pub fn with_street_number(mut self, street_number: impl Into<String>) -> Self {
        self.street_number = Some(street_number.into());
        self
    }

    pub fn with_zipcode(mut self, zipcode: impl Into<String>) -> Self {
        self.zipcode = Some(zipcode.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_iso_country(mut self, iso: impl Into<String>) -> Self {
        self.iso_country = Some(iso.into());
        self
    }

    pub fn with_country_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.country_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true when nothing in the query can be resolved
    ///
    /// Country ids alone only scope a search, they do not describe a place.
    pub fn is_empty(&self) -> bool {
        self.raw_coords.is_none()
            && self.street.is_none()
            && self.street_number.is_none()
            && self.zipcode.is_none()
            && self.city.is_none()
            && self.iso_country.is_none()
    }

    /// Returns the canonical form of this query
    ///
    /// Text fields are trimmed and blank ones dropped, the ISO code is
    /// uppercased and country ids are sorted and deduplicated.
    pub fn normalized(&self) -> Self {
        let text = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut country_ids: Vec<String> = self
            .country_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        country_ids.sort();
        country_ids.dedup();

        Self {
            street: text(&self.street),
            street_number: text(&self.street_number),
            zipcode: text(&self.zipcode),
            city: text(&self.city),
            iso_country: text(&self.iso_country).map(|iso| iso.to_uppercase()),
            country_ids,
            // -0.0 + 0.0 == +0.0
            raw_coords: self.raw_coords.map(|c| Coordinates::new(c.lat + 0.0, c.lon + 0.0)),
        }
    }

    /// Fingerprint of the normalized query
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_query(self)
    }

    /// Street and house number joined the way the provider expects them
    pub fn street_line(&self) -> Option<String> {
        let line = format!(
            "{} {}",
            self.street.as_deref().unwrap_or_default(),
            self.street_number.as_deref().unwrap_or_default()
        );
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

/// Deterministic fingerprint identifying one cache slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes the normalized form of `query`
    pub fn for_query(query: &AddressQuery) -> Self {
        let normalized = query.normalized();
        let mut hasher = Sha256::new();
        hasher.update(canonical_bytes(&normalized));
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field-ordered byte encoding of a normalized query
fn canonical_bytes(query: &AddressQuery) -> Vec<u8> {
    let mut out = Vec::new();
    let mut field = |name: &str, value: Option<&str>| {
        out.extend_from_slice(name.as_bytes());
        out.push(b'=');
        if let Some(value) = value {
            out.extend_from_slice(value.as_bytes());
        }
        out.push(0);
    };

    field("street", query.street.as_deref());
    field("streetNumber", query.street_number.as_deref());
    field("zipcode", query.zipcode.as_deref());
    field("city", query.city.as_deref());
    field("iso", query.iso_country.as_deref());
    let country_ids: String = query
        .country_ids
        .iter()
        .map(|id| format!("{}:{}", id.len(), id))
        .collect();
    field("countryIds", Some(&country_ids));
    let coords = query.raw_coords.map(|c| format!("{}|{}", c.lat, c.lon));
    field("coords", coords.as_deref());
    out
}

/// A resolved location as held by the cache store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Cache slot of the original query
    pub id: CacheKey,
    /// The original query this record was resolved for
    pub payload: AddressQuery,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn new(id: CacheKey, payload: AddressQuery, coords: Coordinates, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            lat: coords.lat,
            lon: coords.lon,
            updated_at,
        }
    }

    pub fn coords(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    /// A record is fresh while `now - updated_at` is strictly below `ttl`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.updated_at < ttl
    }
}

/// Record the materializer computes distances to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    /// Inactive targets are skipped during materialization
    pub active: bool,
}

impl Target {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Materialized distance between a location and one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceCacheRow {
    pub location_id: CacheKey,
    pub target_id: String,
    /// Great-circle distance, always stored in kilometres
    pub distance_km: f64,
    pub created_at: DateTime<Utc>,
}

impl DistanceCacheRow {
    /// Distance converted to `unit`
    pub fn distance_in(&self, unit: DistanceUnit) -> f64 {
        unit.convert_km(self.distance_km)
    }
}

/// Unit distances are reported in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Km,
    Mi,
}

impl DistanceUnit {
    /// Converts a kilometre value into this unit
    pub fn convert_km(self, km: f64) -> f64 {
        match self {
            DistanceUnit::Km => km,
            DistanceUnit::Mi => km / KM_PER_MILE,
        }
    }

    /// Converts a value in this unit back to kilometres
    pub fn to_km(self, value: f64) -> f64 {
        match self {
            DistanceUnit::Km => value,
            DistanceUnit::Mi => value * KM_PER_MILE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceUnit::Km => "km",
            DistanceUnit::Mi => "mi",
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "km" | "kilometer" | "kilometre" | "kilometers" | "kilometres" => Ok(DistanceUnit::Km),
            "mi" | "mile" | "miles" => Ok(DistanceUnit::Mi),
            other => Err(format!("unknown distance unit: '{}'", other)),
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
