//! Open-Meteo geocoding API client
//!
//! Resolves a free-text place name to coordinates.

use reqwest::Client;
use serde::Deserialize;

use super::{get_json, Location, SourceError};

/// Name used for this upstream in errors and logs
pub const RESOURCE: &str = "geocoding";

/// Base URL for the Open-Meteo geocoding API
pub const DEFAULT_BASE_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

/// Geocoding API response; `results` is absent when nothing matched
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    name: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

/// Client for the geocoding search endpoint
#[derive(Debug, Clone)]
pub struct GeocodingClient {
    client: Client,
    base_url: String,
}

impl GeocodingClient {
    /// Creates a client against `base_url` using a shared HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Looks up the best match for `name`
    ///
    /// # Returns
    /// * `Ok(Location)` - The top search result
    /// * `Err(SourceError::NotFound)` - If the geocoder has no match
    /// * `Err(SourceError)` - If the request or parsing fails
    pub async fn search(&self, name: &str) -> Result<Location, SourceError> {
        let query = [
            ("name", name.to_string()),
            ("count", "1".to_string()),
            ("language", "en".to_string()),
            ("format", "json".to_string()),
        ];
        let response: SearchResponse = get_json(&self.client, RESOURCE, &self.base_url, &query).await?;
        first_match(response, name)
    }
}

fn first_match(response: SearchResponse, name: &str) -> Result<Location, SourceError> {
    let result = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::NotFound(name.to_string()))?;

    Ok(Location {
        name: result.name,
        country: result.country,
        latitude: result.latitude,
        longitude: result.longitude,
        timezone: result.timezone,
    })
}
