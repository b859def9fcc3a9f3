//! Upstream data sources and the payloads they produce
//!
//! Every payload here is serializable so it can sit in the cache as JSON.
//! The [`WeatherSource`] trait is the seam between the weather service and
//! the network; [`OpenMeteo`] is the production implementation.

pub mod air_quality;
pub mod geocoding;
mod open_meteo;
pub mod weather;

pub use air_quality::AirQualityClient;
pub use geocoding::GeocodingClient;
pub use open_meteo::{Endpoints, OpenMeteo};
pub use weather::WeatherClient;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised by an upstream adapter
///
/// Transport and parse failures are handled the same way by the cache: both
/// mean "this fetch failed".
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request to {resource} failed: {source}")]
    Transport {
        resource: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream answered with a non-success status
    #[error("{resource} returned HTTP {status}")]
    Status { resource: &'static str, status: u16 },

    /// Failed to parse JSON response
    #[error("Failed to parse {resource} response: {source}")]
    Parse {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Missing expected field in response
    #[error("Missing expected field in {resource} response: {field}")]
    MissingField { resource: &'static str, field: String },

    /// The geocoder had no match for the requested name
    #[error("No location found matching '{0}'")]
    NotFound(String),
}

impl SourceError {
    /// The upstream this error came from
    pub fn resource(&self) -> &'static str {
        match self {
            SourceError::Transport { resource, .. }
            | SourceError::Status { resource, .. }
            | SourceError::Parse { resource, .. }
            | SourceError::MissingField { resource, .. } => resource,
            SourceError::NotFound(_) => geocoding::RESOURCE,
        }
    }

    /// Whether the upstream could not be reached or refused the request
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SourceError::Transport { .. } | SourceError::Status { .. }
        )
    }

    /// Whether retrying later might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport { .. } => true,
            SourceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A geocoded place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Canonical name reported by the geocoder
    pub name: String,
    /// Country name, when known
    pub country: Option<String>,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
    /// IANA timezone, when known
    pub timezone: Option<String>,
}

/// Current weather at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub location: Location,
    /// Local observation time
    pub observed_at: NaiveDateTime,
    /// Current temperature in Celsius
    pub temperature: f64,
    /// Feels-like temperature in Celsius
    pub feels_like: f64,
    /// Relative humidity percentage (0-100)
    pub humidity: u8,
    /// Wind speed in km/h
    pub wind_speed: f64,
    /// Wind direction in degrees
    pub wind_direction: f64,
    pub condition: WeatherCondition,
}

/// One day of a multi-day forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub condition: WeatherCondition,
    /// Daily high in Celsius
    pub temperature_max: f64,
    /// Daily low in Celsius
    pub temperature_min: f64,
    /// Total precipitation in mm
    pub precipitation: f64,
    /// Highest hourly precipitation probability, if reported
    pub precipitation_probability: Option<u8>,
}

/// Multi-day forecast for a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub location: Location,
    pub days: Vec<DailyForecast>,
}

/// Current air quality at a coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: NaiveDateTime,
    /// European Air Quality Index (0 = clean, 100+ = extremely poor)
    pub european_aqi: Option<u32>,
    pub category: AqiCategory,
    /// Fine particulate matter in μg/m³
    pub pm2_5: Option<f64>,
    /// Coarse particulate matter in μg/m³
    pub pm10: Option<f64>,
    /// Ozone in μg/m³
    pub ozone: Option<f64>,
    /// Nitrogen dioxide in μg/m³
    pub nitrogen_dioxide: Option<f64>,
}

/// Types of weather conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Rain,
    Showers,
    Thunderstorm,
    Snow,
    Fog,
}

/// European AQI bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Fair,
    Moderate,
    Poor,
    VeryPoor,
    ExtremelyPoor,
    /// No index reported
    Unknown,
}

/// Capability to fetch each kind of payload from an upstream
///
/// Implementations bound their own latency; the cache never times out a
/// fetch on its own.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Resolves a place name to coordinates
    async fn locate(&self, name: &str) -> Result<Location, SourceError>;

    async fn current_conditions(&self, location: &Location)
        -> Result<CurrentConditions, SourceError>;

    /// Daily forecast for `days` days starting today
    async fn forecast(&self, location: &Location, days: u8) -> Result<Forecast, SourceError>;

    async fn air_quality(&self, latitude: f64, longitude: f64)
        -> Result<AirQuality, SourceError>;
}

/// Issues a GET and decodes the JSON body, mapping failures to [`SourceError`]
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    resource: &'static str,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, SourceError> {
    debug!(resource, url, "requesting upstream");

    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|source| SourceError::Transport { resource, source })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            resource,
            status: status.as_u16(),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|source| SourceError::Transport { resource, source })?;

    parse_json(resource, &text)
}

/// Decodes an upstream body
pub(crate) fn parse_json<T: DeserializeOwned>(
    resource: &'static str,
    text: &str,
) -> Result<T, SourceError> {
    serde_json::from_str(text).map_err(|source| SourceError::Parse { resource, source })
}

/// Parse an Open-Meteo local timestamp (e.g., "2024-07-15T14:00")
pub(crate) fn parse_local_time(
    resource: &'static str,
    value: &str,
) -> Result<NaiveDateTime, SourceError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M").map_err(|_| SourceError::MissingField {
        resource,
        field: format!("valid time (got '{}')", value),
    })
}
