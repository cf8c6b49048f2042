//! Geocoder configuration
//!
//! All settings have defaults, so an empty TOML file (or no file at all) gives
//! a working configuration against the public Nominatim endpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::data::nominatim::{DEFAULT_USER_AGENT, NOMINATIM_SEARCH_URL};
use crate::data::{DistanceUnit, DEFAULT_LOCATION_TTL_SECS};

/// Environment variable holding the deployment's public URL
pub const APP_URL_ENV: &str = "APP_URL";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Settings for the resolver, the provider client and the stores
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Provider search endpoint
    pub endpoint: String,
    /// Public URL of this deployment, sent as `Referer`
    pub public_url: String,
    /// User agent sent to the provider
    pub user_agent: String,
    /// Delay before every provider call, in milliseconds
    pub throttle_ms: u64,
    /// How long a resolved location stays fresh, in seconds
    pub cache_ttl_secs: u64,
    /// Country ids used when a caller passes none
    pub default_country_ids: Vec<String>,
    /// ISO codes used when no country ids are known at all
    pub fallback_country_isos: Vec<String>,
    /// Postal patterns used when no country ids are known at all
    pub fallback_postal_patterns: Vec<String>,
    /// Unit distances are displayed in
    pub unit_of_measurement: DistanceUnit,
    /// Directory for the file-backed cache, XDG cache dir when unset
    pub cache_dir: Option<PathBuf>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: NOMINATIM_SEARCH_URL.to_string(),
            public_url: "http://localhost".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            throttle_ms: 1000,
            cache_ttl_secs: DEFAULT_LOCATION_TTL_SECS as u64,
            default_country_ids: Vec::new(),
            // DE, AT, CH
            fallback_country_isos: vec!["DE".to_string(), "AT".to_string(), "CH".to_string()],
            fallback_postal_patterns: vec![r"\d{5}".to_string(), r"\d{4}".to_string()],
            unit_of_measurement: DistanceUnit::Mi,
            cache_dir: None,
        }
    }
}

impl GeocoderConfig {
    /// Loads configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `APP_URL` from the environment when it is set and non-empty
    pub fn with_env(self) -> Self {
        let app_url = std::env::var(APP_URL_ENV).ok();
        self.with_app_url(app_url.as_deref())
    }

    fn with_app_url(mut self, app_url: Option<&str>) -> Self {
        if let Some(url) = app_url.map(str::trim).filter(|u| !u.is_empty()) {
            self.public_url = url.to_string();
        }
        self
    }

    /// Provider throttle as a `Duration`
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Location freshness window
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.cache_ttl_secs).unwrap_or(i64::MAX))
    }
}
