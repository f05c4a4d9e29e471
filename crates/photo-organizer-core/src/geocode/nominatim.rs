use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Geocoder, GeocoderOptions, LookupOutcome};
use crate::media::{Coordinates, COORDINATE_PRECISION};

/// Address fields tried in order when naming a place.
const LOCALITY_FIELDS: &[&str] = &[
    "city",
    "town",
    "village",
    "suburb",
    "municipality",
    "county",
    "state",
    "country",
];

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    address: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Reverse geocoding against a Nominatim-compatible HTTP endpoint.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl NominatimGeocoder {
    pub fn from_options(options: &GeocoderOptions) -> anyhow::Result<Self> {
        let api_key = std::env::var(&options.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                variable = %options.api_key_env,
                "No geocoding credential set; every location will be \"{}\"",
                super::UNKNOWN_LOCATION
            );
        }
        Self::new(options, api_key)
    }

    pub fn new(options: &GeocoderOptions, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: options.endpoint.clone(),
            api_key,
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn reverse(&self, coordinates: Coordinates) -> LookupOutcome {
        let Some(api_key) = &self.api_key else {
            return LookupOutcome::Transient("no geocoding credential".to_string());
        };

        let q = coordinates.quantized();
        let lat = format!("{:.prec$}", q.latitude, prec = COORDINATE_PRECISION);
        let lon = format!("{:.prec$}", q.longitude, prec = COORDINATE_PRECISION);

        let response = match self
            .client
            .get(&self.endpoint)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "json"),
                ("accept-language", "en"),
                ("api_key", api_key.as_str()),
            ])
            .send()
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return LookupOutcome::Transient("request timed out".to_string()),
            Err(e) => return LookupOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        if let Some(outcome) = outcome_from_status(status) {
            return outcome;
        }

        match response.json::<ReverseResponse>() {
            Ok(body) => outcome_from_response(&body),
            Err(e) => LookupOutcome::Transient(format!("malformed response: {e}")),
        }
    }
}

/// Classify non-success statuses. `None` means read the body.
fn outcome_from_status(status: StatusCode) -> Option<LookupOutcome> {
    if status.is_success() {
        return None;
    }
    let outcome = match status {
        StatusCode::NOT_FOUND => LookupOutcome::Empty,
        StatusCode::TOO_MANY_REQUESTS => LookupOutcome::Transient("rate limited (429)".to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LookupOutcome::Transient(format!("credential rejected ({status})"))
        }
        s => LookupOutcome::Transient(format!("unexpected status {s}")),
    };
    Some(outcome)
}

fn outcome_from_response(body: &ReverseResponse) -> LookupOutcome {
    if body.error.is_some() {
        return LookupOutcome::Empty;
    }
    let Some(address) = &body.address else {
        return LookupOutcome::Empty;
    };

    LOCALITY_FIELDS
        .iter()
        .filter_map(|field| address.get(*field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(|name| LookupOutcome::Found(name.to_string()))
        .unwrap_or(LookupOutcome::Empty)
}
