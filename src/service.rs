//! Public location service
//!
//! Wires the term parser, the resolution cascade, country reference data and
//! the distance materializer into the operations application code calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheManager, DistanceStore, LocationCache, LocationStore, MemoryStore, StoreError};
use crate::cascade::Resolver;
use crate::config::GeocoderConfig;
use crate::data::{
    AddressQuery, Context, Country, CountryLookup, DistanceUnit, GeocodeProvider, LocationRecord, NominatimClient,
    ProviderError, StaticCountries, Target,
};
use crate::distance::{DistanceMaterializer, NearbyTarget, TargetSource};
use crate::parser::{TermParseError, TermParser};

/// Errors surfaced by [`LocationService`]
///
/// Provider failures are absent on purpose: a resolution that cannot reach the
/// provider logs the failure and yields `None`.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Parse(#[from] TermParseError),
}

/// Shipping address of a customer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerAddress {
    pub street: Option<String>,
    pub zipcode: Option<String>,
    pub city: Option<String>,
    /// ISO-2, ISO-3 code or country name
    pub country_iso: Option<String>,
}

/// Geocoding and proximity operations for one deployment
#[derive(Clone)]
pub struct LocationService {
    config: GeocoderConfig,
    provider: Arc<dyn GeocodeProvider>,
    resolver: Resolver,
    distances: DistanceMaterializer,
    countries: Arc<dyn CountryLookup>,
    targets: Arc<dyn TargetSource>,
    /// Compiled parsers keyed by postal pattern set
    parsers: Arc<Mutex<HashMap<Vec<String>, Arc<TermParser>>>>,
}

impl LocationService {
    /// Creates a service with in-memory stores, the built-in country table and no targets
    pub fn new(config: GeocoderConfig, provider: Arc<dyn GeocodeProvider>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let resolver = Resolver::new(
            LocationCache::new(store.clone()).with_ttl(config.cache_ttl()),
            provider.clone(),
        );
        let no_targets: HashMap<String, Vec<Target>> = HashMap::new();

        Self {
            config,
            provider,
            resolver,
            distances: DistanceMaterializer::new(store),
            countries: Arc::new(StaticCountries),
            targets: Arc::new(no_targets),
            parsers: Arc::default(),
        }
    }

    /// Creates a service talking to Nominatim as configured
    ///
    /// Both caches persist to `cache_dir`, or to the XDG cache directory when
    /// it is unset. Without a home directory they live in memory.
    pub fn from_config(config: GeocoderConfig) -> Result<Self, ProviderError> {
        let provider = Arc::new(NominatimClient::from_config(&config)?);
        let files = file_cache(&config).map(Arc::new);
        let service = Self::new(config, provider);

        Ok(match files {
            Some(files) => service.with_location_store(files.clone()).with_distance_store(files),
            None => service,
        })
    }

    pub fn with_location_store(mut self, store: Arc<dyn LocationStore>) -> Self {
        let cache = LocationCache::new(store).with_ttl(self.config.cache_ttl());
        self.resolver = Resolver::new(cache, self.provider.clone());
        self
    }

    pub fn with_distance_store(mut self, store: Arc<dyn DistanceStore>) -> Self {
        self.distances = DistanceMaterializer::new(store);
        self
    }

    pub fn with_countries(mut self, countries: Arc<dyn CountryLookup>) -> Self {
        self.countries = countries;
        self
    }

    pub fn with_targets(mut self, targets: Arc<dyn TargetSource>) -> Self {
        self.targets = targets;
        self
    }

    pub fn config(&self) -> &GeocoderConfig {
        &self.config
    }

    /// Parses a free-form search term and resolves it
    ///
    /// Postal codes are recognized with the patterns of `country_ids`, and the
    /// provider search is scoped to their ISO codes.
    pub async fn resolve_by_term(
        &self,
        ctx: &Context,
        term: &str,
        country_ids: &[String],
    ) -> Result<Option<LocationRecord>, ServiceError> {
        let parser = self.parser_for(self.postal_code_patterns(country_ids))?;
        let mut query = parser.parse(term);
        if query.raw_coords.is_none() {
            query.country_ids = country_ids.to_vec();
        }
        debug!(term, ?query, "parsed search term");

        let iso_codes = self.country_iso_codes(country_ids);
        Ok(self.resolver.resolve(ctx, &query, &iso_codes).await?)
    }

    /// Resolves a structured address
    ///
    /// Non-empty `country_ids` replace the ids carried by `payload`.
    pub async fn resolve_by_address(
        &self,
        ctx: &Context,
        payload: &AddressQuery,
        country_ids: &[String],
    ) -> Result<Option<LocationRecord>, ServiceError> {
        let mut query = payload.clone();
        if !country_ids.is_empty() {
            query.country_ids = country_ids.to_vec();
        }

        let iso_codes = self.country_iso_codes(&query.country_ids);
        Ok(self.resolver.resolve(ctx, &query, &iso_codes).await?)
    }

    /// Resolves a customer's shipping address; no address resolves to `None`
    pub async fn resolve_customer_location(
        &self,
        ctx: &Context,
        address: Option<&CustomerAddress>,
    ) -> Result<Option<LocationRecord>, ServiceError> {
        let Some(address) = address else {
            return Ok(None);
        };

        let mut query = AddressQuery {
            street: address.street.clone(),
            zipcode: address.zipcode.clone(),
            city: address.city.clone(),
            ..AddressQuery::default()
        };

        let country = address.country_iso.as_deref().and_then(|code| self.country_by_iso(code));
        match country {
            Some(country) => {
                query.iso_country = Some(country.iso);
                query.country_ids = vec![country.id];
            }
            None => {
                query.iso_country = address
                    .country_iso
                    .as_deref()
                    .map(str::trim)
                    .filter(|code| code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
                    .map(str::to_uppercase);
            }
        }

        let country_ids = query.country_ids.clone();
        self.resolve_by_address(ctx, &query, &country_ids).await
    }

    /// Empties the location cache for every context
    pub async fn clear_location_cache(&self, ctx: &Context) -> Result<(), ServiceError> {
        Ok(self.resolver.cache().clear(ctx).await?)
    }

    /// Materializes distances from `location` to the active targets of `collection`
    ///
    /// Every active target is stored. The returned view holds the targets
    /// within `distance` (in `unit`, `0` for no limit), nearest first.
    pub async fn write_distance_cache(
        &self,
        ctx: &Context,
        location: &LocationRecord,
        collection: &str,
        distance: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<NearbyTarget>, ServiceError> {
        let targets = self.targets.targets(ctx, collection).await?;
        self.distances.materialize(ctx, location, &targets).await?;
        self.nearby(ctx, location, distance, unit).await
    }

    /// Reads the materialized distances of `location` within `radius` (`0` for no limit)
    pub async fn nearby(
        &self,
        ctx: &Context,
        location: &LocationRecord,
        radius: f64,
        unit: DistanceUnit,
    ) -> Result<Vec<NearbyTarget>, ServiceError> {
        Ok(self.distances.nearby(ctx, &location.id, Some(radius), unit).await?)
    }

    /// Empties the distance cache for every context
    pub async fn clear_distance_cache(&self, ctx: &Context) -> Result<(), ServiceError> {
        Ok(self.distances.clear(ctx).await?)
    }

    /// Unit distances are displayed in
    pub fn unit_of_measurement(&self) -> DistanceUnit {
        self.config.unit_of_measurement
    }

    pub fn country_by_iso(&self, code: &str) -> Option<Country> {
        self.countries.country_by_iso(code)
    }

    /// ISO codes scoping a search for `country_ids`
    ///
    /// Falls back to the configured default ids, then to the configured
    /// fallback ISO codes.
    pub fn country_iso_codes(&self, country_ids: &[String]) -> Vec<String> {
        self.resolve_countries(country_ids, |c| Some(c.iso.clone()))
            .unwrap_or_else(|| self.config.fallback_country_isos.clone())
    }

    /// Postal code patterns of `country_ids`, with the same fallback chain
    ///
    /// Countries without a pattern contribute nothing.
    pub fn postal_code_patterns(&self, country_ids: &[String]) -> Vec<String> {
        self.resolve_countries(country_ids, |c| c.postal_code_pattern.clone())
            .unwrap_or_else(|| self.config.fallback_postal_patterns.clone())
    }

    /// Returns the parser for `patterns`, compiling it on first use
    fn parser_for(&self, patterns: Vec<String>) -> Result<Arc<TermParser>, ServiceError> {
        let mut parsers = self.parsers.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(parser) = parsers.get(&patterns) {
            return Ok(parser.clone());
        }

        let parser = Arc::new(TermParser::new(&patterns)?);
        parsers.insert(patterns, parser.clone());
        Ok(parser)
    }

    /// Maps explicit ids, else the default ids; `None` when neither yields anything
    fn resolve_countries<F>(&self, country_ids: &[String], field: F) -> Option<Vec<String>>
    where
        F: Fn(&Country) -> Option<String>,
    {
        [country_ids, self.config.default_country_ids.as_slice()]
            .into_iter()
            .filter(|ids| !ids.is_empty())
            .map(|ids| {
                let mut values: Vec<String> = Vec::new();
                for value in self.countries.countries_by_ids(ids).iter().filter_map(&field) {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
                values
            })
            .find(|values| !values.is_empty())
    }
}

/// File-backed cache for `config`: `cache_dir`, else the XDG cache directory
fn file_cache(config: &GeocoderConfig) -> Option<CacheManager> {
    match &config.cache_dir {
        Some(dir) => Some(CacheManager::with_dir(dir.clone())),
        None => CacheManager::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Candidate, GeocodeRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Provider that always answers with one German candidate
    #[derive(Default)]
    struct FixedProvider {
        requests: Mutex<Vec<GeocodeRequest>>,
    }

    impl FixedProvider {
        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last(&self) -> GeocodeRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl GeocodeProvider for FixedProvider {
        async fn geocode(&self, request: &GeocodeRequest) -> Result<Vec<Candidate>, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(vec![Candidate::new(52.53, 13.38, Some("de"))])
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn service() -> (LocationService, Arc<FixedProvider>) {
        let provider = Arc::new(FixedProvider::default());
        (LocationService::new(GeocoderConfig::default(), provider.clone()), provider)
    }

    #[test]
    fn test_country_iso_codes_fallback_chain() {
        let (service, _) = service();
        assert_eq!(service.country_iso_codes(&ids(&["at", "de"])), vec!["AT", "DE"]);
        assert_eq!(service.country_iso_codes(&[]), vec!["DE", "AT", "CH"]);
        assert_eq!(service.country_iso_codes(&ids(&["unknown"])), vec!["DE", "AT", "CH"]);

        let config = GeocoderConfig {
            default_country_ids: ids(&["fr"]),
            ..GeocoderConfig::default()
        };
        let with_defaults = LocationService::new(config, Arc::new(FixedProvider::default()));
        assert_eq!(with_defaults.country_iso_codes(&[]), vec!["FR"]);
        assert_eq!(with_defaults.country_iso_codes(&ids(&["nl"])), vec!["NL"]);
    }

    #[test]
    fn test_postal_code_patterns_skip_countries_without_pattern() {
        let (service, _) = service();
        assert_eq!(service.postal_code_patterns(&ids(&["de", "li"])), vec![r"\d{5}"]);
        assert_eq!(service.postal_code_patterns(&ids(&["de", "fr"])), vec![r"\d{5}"]);
        assert_eq!(service.postal_code_patterns(&[]), vec![r"\d{5}", r"\d{4}"]);
    }

    #[test]
    fn test_unit_of_measurement_from_config() {
        let (service, _) = service();
        assert_eq!(service.unit_of_measurement(), DistanceUnit::Mi);
    }

    #[tokio::test]
    async fn test_resolve_by_term_scopes_search() {
        let (service, provider) = service();

        let record = service
            .resolve_by_term(&Context::default(), "10115, Torstraße 1, Berlin", &ids(&["de"]))
            .await
            .unwrap()
            .expect("Term should resolve");

        assert_eq!(record.payload.zipcode.as_deref(), Some("10115"));
        assert_eq!(record.payload.country_ids, ids(&["de"]));
        let request = provider.last();
        assert_eq!(request.countrycodes, vec!["DE"]);
        assert_eq!(request.street.as_deref(), Some("Torstraße 1"));
    }

    #[tokio::test]
    async fn test_resolve_by_term_raw_coordinates() {
        let (service, provider) = service();

        let record = service
            .resolve_by_term(&Context::default(), "52.5200|13.4050", &ids(&["de"]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(provider.calls(), 0);
        assert!((record.lat - 52.52).abs() < 1e-9);
        assert!(record.payload.country_ids.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_by_term_with_nothing_usable() {
        let (service, provider) = service();

        let result = service.resolve_by_term(&Context::default(), " , 123abc456 ,", &[]).await.unwrap();

        assert!(result.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_by_address_uses_cache_on_second_call() {
        let (service, provider) = service();
        let ctx = Context::default();
        let payload = AddressQuery::default().with_city("Berlin");

        let first = service.resolve_by_address(&ctx, &payload, &[]).await.unwrap();
        let second = service.resolve_by_address(&ctx, &payload, &[]).await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_resolve_customer_location() {
        let (service, provider) = service();
        let ctx = Context::default();

        assert!(service.resolve_customer_location(&ctx, None).await.unwrap().is_none());

        let address = CustomerAddress {
            street: Some("Ringstraße 5".to_string()),
            zipcode: Some("1010".to_string()),
            city: Some("Wien".to_string()),
            country_iso: Some("AUT".to_string()),
        };
        let record = service.resolve_customer_location(&ctx, Some(&address)).await.unwrap().unwrap();

        assert_eq!(record.payload.iso_country.as_deref(), Some("AT"));
        assert_eq!(record.payload.country_ids, ids(&["at"]));
        assert_eq!(provider.last().countrycodes, vec!["AT"]);
    }

    #[tokio::test]
    async fn test_customer_country_that_is_not_an_iso_code_is_dropped() {
        let (service, provider) = service();
        let ctx = Context::default();
        let address = CustomerAddress {
            city: Some("Wien".to_string()),
            country_iso: Some("Österreich".to_string()),
            ..CustomerAddress::default()
        };

        let record = service.resolve_customer_location(&ctx, Some(&address)).await.unwrap().unwrap();

        assert!(record.payload.iso_country.is_none());
        assert_eq!(provider.last().countrycodes, vec!["DE", "AT", "CH"]);

        let unknown_iso = CustomerAddress {
            city: Some("Vaduz".to_string()),
            country_iso: Some("zz".to_string()),
            ..CustomerAddress::default()
        };
        let record = service.resolve_customer_location(&ctx, Some(&unknown_iso)).await.unwrap().unwrap();

        assert_eq!(record.payload.iso_country.as_deref(), Some("ZZ"));
        assert_eq!(provider.last().countrycodes, vec!["ZZ"]);
    }

    #[tokio::test]
    async fn test_parsers_are_compiled_once_per_pattern_set() {
        let (service, _) = service();
        let ctx = Context::default();

        service.resolve_by_term(&ctx, "Berlin", &ids(&["de"])).await.unwrap();
        service.resolve_by_term(&ctx, "Hamburg", &ids(&["de", "fr"])).await.unwrap();
        assert_eq!(service.parsers.lock().unwrap().len(), 1, "de and fr share one pattern");

        service.resolve_by_term(&ctx, "Wien", &ids(&["at"])).await.unwrap();
        assert_eq!(service.parsers.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_file_cache_prefers_configured_dir() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let config = GeocoderConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..GeocoderConfig::default()
        };

        let cache = file_cache(&config).expect("Configured dir always yields a cache");
        assert_eq!(cache.cache_dir(), dir.path());

        if let Some(cache) = file_cache(&GeocoderConfig::default()) {
            assert!(cache.cache_dir().to_string_lossy().contains("geocache"));
        }
        // No home directory (e.g. in CI) leaves the default without a file cache
    }

    #[tokio::test]
    async fn test_from_config_persists_to_cache_dir() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let config = GeocoderConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..GeocoderConfig::default()
        };
        let service = LocationService::from_config(config).expect("Client should build");

        service
            .resolve_by_term(&Context::default(), "52.5200|13.4050", &[])
            .await
            .unwrap()
            .expect("Coordinates always resolve");

        assert!(dir.path().join("locations").exists());
    }

    #[tokio::test]
    async fn test_clear_location_cache_forces_new_lookup() {
        let (service, provider) = service();
        let ctx = Context::default();
        let payload = AddressQuery::default().with_city("Berlin");

        service.resolve_by_address(&ctx, &payload, &[]).await.unwrap();
        service.clear_location_cache(&ctx).await.unwrap();
        service.resolve_by_address(&ctx, &payload, &[]).await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_write_distance_cache_and_clear() {
        let mut collections: HashMap<String, Vec<Target>> = HashMap::new();
        collections.insert(
            "stores".to_string(),
            vec![
                Target::new("mitte", 52.53, 13.38),
                Target::new("munich", 48.1351, 11.5820),
                Target::new("closed", 52.52, 13.40).inactive(),
            ],
        );
        let (service, _) = service();
        let service = service.with_targets(Arc::new(collections));
        let ctx = Context::default();
        let location = service
            .resolve_by_address(&ctx, &AddressQuery::default().with_city("Berlin"), &[])
            .await
            .unwrap()
            .unwrap();

        let within = service
            .write_distance_cache(&ctx, &location, "stores", 100.0, DistanceUnit::Km)
            .await
            .unwrap();
        let ids: Vec<&str> = within.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, vec!["mitte"]);

        let all = service.nearby(&ctx, &location, 0.0, DistanceUnit::Mi).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|t| t.unit == DistanceUnit::Mi));

        service.clear_distance_cache(&ctx).await.unwrap();
        assert!(service.nearby(&ctx, &location, 0.0, DistanceUnit::Km).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_postal_pattern_is_parse_error() {
        struct BrokenCountries;

        impl CountryLookup for BrokenCountries {
            fn countries_by_ids(&self, ids: &[String]) -> Vec<Country> {
                ids.iter()
                    .map(|id| Country {
                        id: id.clone(),
                        iso: "XX".to_string(),
                        iso3: "XXX".to_string(),
                        name: "Broken".to_string(),
                        postal_code_pattern: Some("(".to_string()),
                    })
                    .collect()
            }

            fn country_by_iso(&self, _code: &str) -> Option<Country> {
                None
            }
        }

        let (service, _) = service();
        let service = service.with_countries(Arc::new(BrokenCountries));

        let result = service.resolve_by_term(&Context::default(), "Berlin", &ids(&["xx"])).await;
        assert!(matches!(result, Err(ServiceError::Parse(_))));
    }
}
