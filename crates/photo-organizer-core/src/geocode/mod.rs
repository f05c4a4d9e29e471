pub mod cache;
pub mod nominatim;
pub mod rate;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::media::Coordinates;

pub use self::cache::LocationCache;
pub use self::nominatim::NominatimGeocoder;
pub use self::rate::RateGate;

/// Place name used when no location can be determined.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

/// Result of one external reverse lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// A usable place name.
    Found(String),
    /// The service answered, but there is nothing there. Cached.
    Empty,
    /// The service could not be asked or did not answer usably. Not cached.
    Transient(String),
}

/// Reverse geocoding service.
pub trait Geocoder: Send + Sync {
    fn reverse(&self, coordinates: Coordinates) -> LookupOutcome;

    /// `false` when lookups cannot succeed at all (e.g. no credential).
    fn is_available(&self) -> bool {
        true
    }
}

fn default_endpoint() -> String {
    "https://geocode.maps.co/reverse".to_string()
}

fn default_api_key_env() -> String {
    "GEOCODE_API_KEY".to_string()
}

fn default_user_agent() -> String {
    concat!("photo-organizer/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_min_request_interval_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderOptions {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeocoderOptions {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            user_agent: default_user_agent(),
            min_request_interval_ms: default_min_request_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStats {
    pub hits: u64,
    pub lookups: u64,
    pub transient_failures: u64,
}

/// Coordinates -> place name, through the cache and a rate-limited geocoder.
///
/// One instance is shared by all workers of a run.
pub struct LocationResolver {
    geocoder: Box<dyn Geocoder>,
    cache: LocationCache,
    gate: RateGate,
    lookup_lock: Mutex<()>,
    hits: AtomicU64,
    lookups: AtomicU64,
    transient_failures: AtomicU64,
}

impl LocationResolver {
    pub fn new(geocoder: Box<dyn Geocoder>, cache: LocationCache, min_interval: Duration) -> Self {
        Self {
            geocoder,
            cache,
            gate: RateGate::new(min_interval),
            lookup_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            transient_failures: AtomicU64::new(0),
        }
    }

    pub fn resolve(&self, coordinates: Option<Coordinates>) -> String {
        let Some(coordinates) = coordinates else {
            return UNKNOWN_LOCATION.to_string();
        };
        let key = coordinates.cache_key();

        if let Some(place) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return place;
        }

        // One miss at a time, so concurrent misses on a key make one call
        let _guard = self.lookup_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(place) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return place;
        }

        if !self.geocoder.is_available() {
            self.transient_failures.fetch_add(1, Ordering::Relaxed);
            return UNKNOWN_LOCATION.to_string();
        }

        self.gate.wait();
        self.lookups.fetch_add(1, Ordering::Relaxed);
        match self.geocoder.reverse(coordinates) {
            LookupOutcome::Found(name) if !name.trim().is_empty() => {
                let name = name.trim().to_string();
                tracing::debug!(key = %key, place = %name, "Resolved location");
                self.cache.insert(key, name.clone());
                name
            }
            LookupOutcome::Found(_) | LookupOutcome::Empty => {
                tracing::debug!(key = %key, "No place at location");
                self.cache.insert(key, UNKNOWN_LOCATION.to_string());
                UNKNOWN_LOCATION.to_string()
            }
            LookupOutcome::Transient(reason) => {
                tracing::warn!(key = %key, reason = %reason, "Location lookup failed");
                self.transient_failures.fetch_add(1, Ordering::Relaxed);
                UNKNOWN_LOCATION.to_string()
            }
        }
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
        }
    }

    pub fn cache(&self) -> &LocationCache {
        &self.cache
    }

    /// Persist the cache (no-op when in memory).
    pub fn flush(&self) -> Result<(), CacheError> {
        self.cache.save()
    }
}
