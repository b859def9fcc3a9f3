//! [`WeatherSource`] backed by the three Open-Meteo APIs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{
    air_quality, geocoding, weather, AirQuality, AirQualityClient, CurrentConditions, Forecast,
    GeocodingClient, Location, SourceError, WeatherClient, WeatherSource,
};

const USER_AGENT: &str = concat!("weather-lookup/", env!("CARGO_PKG_VERSION"));

/// Base URLs for each Open-Meteo endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub geocoding: String,
    pub weather: String,
    pub air_quality: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            geocoding: geocoding::DEFAULT_BASE_URL.to_string(),
            weather: weather::DEFAULT_BASE_URL.to_string(),
            air_quality: air_quality::DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Open-Meteo clients sharing one connection pool
#[derive(Debug, Clone)]
pub struct OpenMeteo {
    geocoding: GeocodingClient,
    weather: WeatherClient,
    air_quality: AirQualityClient,
}

impl OpenMeteo {
    /// Builds the clients; every request is bounded by `timeout`
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| SourceError::Transport {
                resource: "http client",
                source,
            })?;

        Ok(Self {
            geocoding: GeocodingClient::with_client(client.clone(), endpoints.geocoding),
            weather: WeatherClient::with_client(client.clone(), endpoints.weather),
            air_quality: AirQualityClient::with_client(client, endpoints.air_quality),
        })
    }
}

#[async_trait]
impl WeatherSource for OpenMeteo {
    async fn locate(&self, name: &str) -> Result<Location, SourceError> {
        self.geocoding.search(name).await
    }

    async fn current_conditions(
        &self,
        location: &Location,
    ) -> Result<CurrentConditions, SourceError> {
        self.weather.fetch_current(location).await
    }

    async fn forecast(&self, location: &Location, days: u8) -> Result<Forecast, SourceError> {
        self.weather.fetch_forecast(location, days).await
    }

    async fn air_quality(&self, latitude: f64, longitude: f64) -> Result<AirQuality, SourceError> {
        self.air_quality.fetch_air_quality(latitude, longitude).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoints_point_at_open_meteo() {
        let endpoints = Endpoints::default();
        assert!(endpoints.geocoding.contains("geocoding-api.open-meteo.com"));
        assert!(endpoints.weather.contains("api.open-meteo.com/v1/forecast"));
        assert!(endpoints.air_quality.contains("air-quality-api.open-meteo.com"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_transport_error() {
        // Port 9 (discard) on localhost is closed on any sane test machine
        let endpoints = Endpoints {
            geocoding: "http://127.0.0.1:9/v1/search".to_string(),
            ..Endpoints::default()
        };
        let source = OpenMeteo::new(endpoints, Duration::from_secs(2)).unwrap();

        let err = source.locate("London").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.resource(), "geocoding");
    }
}
