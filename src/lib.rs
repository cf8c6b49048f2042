//! Address geocoding with a cache
//!
//! Resolves free-form search terms and structured addresses to coordinates
//! through a rate-limited Nominatim client, caching every resolution for an
//! hour. When the provider finds nothing, the query is relaxed step by step
//! before giving up. Resolved locations can then be used to materialize
//! distances to a collection of targets.

pub mod cache;
pub mod cascade;
pub mod config;
pub mod data;
pub mod distance;
pub mod parser;
pub mod service;

pub use cache::{CacheManager, LocationCache, MemoryStore, StoreError};
pub use cascade::{Relaxation, Resolver, MAX_TRIES};
pub use config::{ConfigError, GeocoderConfig};
pub use data::{AddressQuery, CacheKey, Context, Coordinates, DistanceUnit, LocationRecord, Target};
pub use distance::{haversine, DistanceMaterializer, NearbyTarget, TargetSource};
pub use parser::{TermParseError, TermParser};
pub use service::{CustomerAddress, LocationService, ServiceError};

use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceLock<()> = OnceLock::new();

/// Installs a global `fmt` subscriber at `level`
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this more than
/// once, or after another subscriber was installed, is a no-op.
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<(), ParseError> {
    if LOGGING.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    // An already installed subscriber wins
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    let _ = LOGGING.set(());
    Ok(())
}
