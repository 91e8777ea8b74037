//! HTTP client for the World Air Quality Index (WAQI) API.
//!
//! One [`fetch`](AirQualitySource::fetch) is one GET request:
//!
//! - coordinate keys: `{base}/feed/geo:{lat};{lon}/?token=...`
//! - name keys: `{base}/feed/{name}/?token=...`
//!
//! The JSON body carries a top-level `status` and a `data` object with
//! `aqi`, `city.name` and an `iaqi` map of `{code: {v: number}}`. Pollutant
//! fields are read defensively: a missing entry becomes `None` on the
//! [`Reading`]. Only `aqi` and the city name are mandatory.
//!
//! # Example
//!
//! ```no_run
//! use openair_core::{AirQualitySource, WaqiClient};
//! use openair_types::LocationKey;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = WaqiClient::new("https://api.waqi.info", "demo", WaqiClient::DEFAULT_TIMEOUT)?;
//! let key = LocationKey::parse("37.7749,-122.4194")?;
//! let reading = client.fetch(&key).await?;
//! println!("{}: AQI {}", reading.location_label, reading.aqi);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use openair_types::{LocationKey, LocationResult, Measure, Reading};

use crate::clock::{Clock, SystemClock};
use crate::error::{FetchError, Result};
use crate::traits::AirQualitySource;

/// Public WAQI endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.waqi.info";

/// HTTP client for the WAQI API.
#[derive(Debug, Clone)]
pub struct WaqiClient {
    client: Client,
    base_url: Url,
    token: String,
    clock: Arc<dyn Clock>,
}

/// A station returned by [`WaqiClient::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMatch {
    /// Station name.
    pub name: String,
    /// Current AQI, if the station reports one.
    pub aqi: Option<i64>,
    /// Station position as `(latitude, longitude)`.
    pub geo: Option<(f64, f64)>,
}

impl StationMatch {
    /// Key that selects this station: its coordinates when known, else its name.
    pub fn location_key(&self) -> LocationResult<LocationKey> {
        match self.geo {
            Some((lat, lon)) => LocationKey::from_coordinates(lat, lon),
            None => LocationKey::from_name(&self.name),
        }
    }
}

impl WaqiClient {
    /// Request timeout used when none is configured.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root (e.g., "https://api.waqi.info")
    /// * `token` - API credential, sent as the `token` query parameter
    /// * `timeout` - Whole-request timeout; a hung call fails with
    ///   [`FetchError::Transport`] once it expires
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim_end_matches('/');
        let parsed =
            Url::parse(trimmed).map_err(|e| FetchError::InvalidBaseUrl(format!("{trimmed}: {e}")))?;

        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidBaseUrl(format!(
                "URL must start with http:// or https://, got: {}",
                trimmed
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("openair/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: parsed,
            token: token.into(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` to stamp acquired readings.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Feed URL for `key`, without the credential.
    pub fn feed_url(&self, key: &LocationKey) -> Result<Url> {
        let target = match key {
            LocationKey::Coordinates { .. } => format!("geo:{}", key),
            LocationKey::Name(name) => name.clone(),
        };
        self.endpoint(&["feed", &target])
    }

    /// Resolve the caller's own location from its IP address.
    ///
    /// Returns the station's coordinates when the API reports them, else its
    /// name.
    pub async fn locate_here(&self) -> Result<LocationKey> {
        let url = self.endpoint(&["feed", "here"])?;
        let data = self.get_data(url, &[]).await?;

        if let Some((lat, lon)) = data.pointer("/city/geo").and_then(as_pair) {
            let key = LocationKey::from_coordinates(lat, lon)
                .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
            info!("Detected location {} from IP", key);
            return Ok(key);
        }

        match data.pointer("/city/name").and_then(Value::as_str) {
            Some(name) => {
                let key = LocationKey::from_name(name)
                    .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
                info!("Detected location {} from IP", key);
                Ok(key)
            }
            None => Err(FetchError::MalformedPayload(
                "location response has neither city.geo nor city.name".to_string(),
            )),
        }
    }

    /// Search monitoring stations by keyword.
    pub async fn search(&self, keyword: &str) -> Result<Vec<StationMatch>> {
        let url = self.endpoint(&["search"])?;
        let data = self.get_data(url, &[("keyword", keyword)]).await?;
        let stations = parse_search(&data)?;
        debug!("Search for {:?} returned {} station(s)", keyword, stations.len());
        Ok(stations)
    }

    // ======================================================================
    // Internal HTTP helpers
    // ======================================================================

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| FetchError::InvalidBaseUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
            // The API expects a trailing slash.
            path.push("");
        }
        Ok(url)
    }

    /// GET `url`, check the HTTP status and the `status` envelope, return `data`.
    async fn get_data(&self, url: Url, query: &[(&str, &str)]) -> Result<Value> {
        debug!("Sending GET request to {}", url);

        let response = self
            .client
            .get(url.clone())
            .query(&[("token", self.token.as_str())])
            .query(query)
            .send()
            .await
            // Keep the credential out of error messages.
            .map_err(|e| with_context(&url, e.without_url()))?;

        let status = response.status();
        debug!("Received response with status code {}", status);
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {} from {}", status, url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| with_context(&url, e.without_url()))?;
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedPayload(format!("invalid JSON from {url}: {e}")))?;

        envelope.into_data()
    }
}

#[async_trait]
impl AirQualitySource for WaqiClient {
    async fn fetch(&self, key: &LocationKey) -> Result<Reading> {
        let url = self.feed_url(key)?;
        info!("Fetching air quality for {}", key);

        let data = self.get_data(url, &[]).await?;
        let reading = parse_feed(&data, self.clock.now())?;

        debug!(
            "Parsed reading for {}: AQI={}",
            reading.location_label, reading.aqi
        );
        Ok(reading)
    }
}

/// Top-level response shape shared by every endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: Option<String>,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_data(self) -> Result<Value> {
        match self.status.as_deref() {
            Some("ok") => Ok(self.data),
            Some(other) => {
                warn!("API returned non-OK status {:?}: {}", other, self.data);
                Err(FetchError::RemoteRejected(other.to_string()))
            }
            None => Err(FetchError::MalformedPayload(
                "missing top-level status field".to_string(),
            )),
        }
    }
}

/// Turn a feed `data` object into a [`Reading`] stamped with `acquired_at`.
///
/// # Errors
///
/// [`FetchError::MalformedPayload`] if `aqi` or `city.name` is missing or
/// unusable. Missing pollutant entries are not errors.
pub fn parse_feed(data: &Value, acquired_at: OffsetDateTime) -> Result<Reading> {
    let aqi = data
        .get("aqi")
        .and_then(as_aqi)
        .ok_or_else(|| FetchError::MalformedPayload("missing or non-numeric aqi".to_string()))?;

    let label = data
        .pointer("/city/name")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::MalformedPayload("missing city.name".to_string()))?;

    let mut reading = Reading::new(acquired_at, label, aqi);
    for measure in Measure::ALL {
        let pointer = format!("/iaqi/{}/v", measure.iaqi_code());
        reading.set(measure, data.pointer(&pointer).and_then(Value::as_f64));
    }

    Ok(reading)
}

/// Turn a search `data` array into station matches.
///
/// Entries without a station name are skipped. An `aqi` of `"-"` means the
/// station has no current data.
pub fn parse_search(data: &Value) -> Result<Vec<StationMatch>> {
    let entries = data
        .as_array()
        .ok_or_else(|| FetchError::MalformedPayload("search data is not an array".to_string()))?;

    let stations = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.pointer("/station/name").and_then(Value::as_str)?;
            Some(StationMatch {
                name: name.to_string(),
                aqi: entry.get("aqi").and_then(as_aqi),
                geo: entry.pointer("/station/geo").and_then(as_pair),
            })
        })
        .collect();

    Ok(stations)
}

/// The API reports AQI as a number, or as a string (`"-"` when unknown).
fn as_aqi(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_pair(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [a, b] => Some((a.as_f64()?, b.as_f64()?)),
        _ => None,
    }
}

fn with_context(url: &Url, err: reqwest::Error) -> FetchError {
    match FetchError::from(err) {
        FetchError::Transport(msg) => FetchError::Transport(format!("{url}: {msg}")),
        other => other,
    }
}
