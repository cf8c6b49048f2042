//! Nominatim geocoding API client
//!
//! Fetches candidate coordinates for a structured address from a
//! Nominatim-compatible search endpoint. Every call waits out a fixed delay
//! first to stay within the provider's fair-use policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, REFERER};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::AddressQuery;
use crate::config::GeocoderConfig;

/// Public Nominatim search endpoint
pub const NOMINATIM_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Fair-use delay enforced before every provider call
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

/// User agent identifying this client to the provider
pub const DEFAULT_USER_AGENT: &str = concat!("geocache/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when calling the geocoding provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with a status outside 2xx
    #[error("[{status_code}] Error connecting to the API ({request_uri})")]
    Upstream { status_code: u16, request_uri: String },

    /// The body could not be decoded as a candidate list
    #[error("[{status_code}] Error decoding JSON: {raw_body}")]
    Decode { status_code: u16, raw_body: String },

    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One geocoding match returned by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub lat: f64,
    pub lon: f64,
    /// Lowercase ISO country code as reported by the provider, if any
    pub country_code: Option<String>,
}

impl Candidate {
    pub fn new(lat: f64, lon: f64, country_code: Option<&str>) -> Self {
        Self {
            lat,
            lon,
            country_code: country_code.map(str::to_string),
        }
    }

    /// Whether the candidate lies in any of `iso_codes` (case-insensitive)
    pub fn in_countries(&self, iso_codes: &[String]) -> bool {
        match &self.country_code {
            Some(code) => iso_codes.iter().any(|iso| iso.eq_ignore_ascii_case(code)),
            None => false,
        }
    }
}

/// Picks the candidate a resolution should use
///
/// Defaults to the first candidate. When target countries are given, the first
/// candidate in response order located in one of them wins instead.
pub fn select_candidate<'a>(candidates: &'a [Candidate], iso_codes: &[String]) -> Option<&'a Candidate> {
    candidates
        .iter()
        .find(|c| c.in_countries(iso_codes))
        .or_else(|| candidates.first())
}

/// Search parameters sent to the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeRequest {
    pub postalcode: Option<String>,
    pub city: Option<String>,
    /// Street and house number joined with a space
    pub street: Option<String>,
    /// ISO codes restricting the search, sent comma separated
    pub countrycodes: Vec<String>,
}

impl GeocodeRequest {
    /// Builds the request for `query`
    ///
    /// An ISO code on the query narrows the search to that single country;
    /// otherwise `default_isos` scope it.
    pub fn from_query(query: &AddressQuery, default_isos: &[String]) -> Self {
        let countrycodes = match &query.iso_country {
            Some(iso) => vec![iso.clone()],
            None => default_isos.to_vec(),
        };

        Self {
            postalcode: query.zipcode.clone(),
            city: query.city.clone(),
            street: query.street_line(),
            countrycodes,
        }
    }

    /// Query string pairs in the provider's parameter order
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("format", "json".to_string())];
        if let Some(postalcode) = &self.postalcode {
            pairs.push(("postalcode", postalcode.clone()));
        }
        if let Some(city) = &self.city {
            pairs.push(("city", city.clone()));
        }
        if let Some(street) = &self.street {
            pairs.push(("street", street.clone()));
        }
        if !self.countrycodes.is_empty() {
            pairs.push(("countrycodes", self.countrycodes.join(",")));
        }
        pairs.push(("addressdetails", "1".to_string()));
        pairs
    }
}

/// Source of geocoding candidates
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Returns the provider's candidates for `request`, possibly none
    async fn geocode(&self, request: &GeocodeRequest) -> Result<Vec<Candidate>, ProviderError>;
}

/// Client for the Nominatim search API
#[derive(Debug, Clone)]
pub struct NominatimClient {
    http_client: Client,
    endpoint: String,
    /// Public URL of the deployment, sent as `Referer`
    referer: String,
    throttle: Duration,
}

impl NominatimClient {
    /// Creates a client against the public endpoint with the default throttle
    pub fn new(referer: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(DEFAULT_USER_AGENT)?,
            endpoint: NOMINATIM_SEARCH_URL.to_string(),
            referer: referer.into(),
            throttle: DEFAULT_THROTTLE,
        })
    }

    /// Creates a client from configuration
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(&config.user_agent)?,
            endpoint: config.endpoint.clone(),
            referer: config.public_url.clone(),
            throttle: config.throttle(),
        })
    }

    /// Points the client at another endpoint (self-hosted instance, mock server)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the delay enforced before each call
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }
}

/// HTTP client that reports redirects as responses instead of following them
fn http_client(user_agent: &str) -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .redirect(Policy::none())
        .build()?)
}

#[async_trait]
impl GeocodeProvider for NominatimClient {
    async fn geocode(&self, request: &GeocodeRequest) -> Result<Vec<Candidate>, ProviderError> {
        tokio::time::sleep(self.throttle).await;

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&request.query_pairs())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(REFERER, &self.referer)
            .send()
            .await?;

        let status = response.status();
        let request_uri = response.url().to_string();
        if !status.is_success() {
            return Err(ProviderError::Upstream {
                status_code: status.as_u16(),
                request_uri,
            });
        }

        let body = response.text().await?;
        let candidates = parse_candidates(status.as_u16(), &body)?;
        debug!(uri = %request_uri, count = candidates.len(), "provider answered");
        Ok(candidates)
    }
}

/// Parse a provider response body into candidates
///
/// The body must be a JSON array. Entries carry `lat`/`lon` as decimal
/// strings; an entry whose coordinates do not parse makes the whole body
/// undecodable.
pub fn parse_candidates(status_code: u16, body: &str) -> Result<Vec<Candidate>, ProviderError> {
    let decode_error = || ProviderError::Decode {
        status_code,
        raw_body: body.to_string(),
    };

    let places: Vec<NominatimPlace> = serde_json::from_str(body).map_err(|_| decode_error())?;

    places
        .into_iter()
        .map(|place| -> Result<Candidate, ProviderError> {
            let lat = place.lat.trim().parse::<f64>().map_err(|_| decode_error())?;
            let lon = place.lon.trim().parse::<f64>().map_err(|_| decode_error())?;
            Ok(Candidate {
                lat,
                lon,
                country_code: place.address.and_then(|a| a.country_code),
            })
        })
        .collect()
}

/// A single search result from Nominatim
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

/// Address details block (`addressdetails=1`)
#[derive(Debug, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country_code: Option<String>,
}
