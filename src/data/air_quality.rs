//! Open-Meteo air quality API client
//!
//! Fetches current pollutant levels for a coordinate and maps the European
//! AQI onto its published bands.

use reqwest::Client;
use serde::Deserialize;

use super::{get_json, parse_local_time, AirQuality, AqiCategory, SourceError};

/// Name used for this upstream in errors and logs
pub const RESOURCE: &str = "air quality";

/// Base URL for the Open-Meteo air quality API
pub const DEFAULT_BASE_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

const CURRENT_FIELDS: &str = "european_aqi,pm10,pm2_5,nitrogen_dioxide,ozone";

/// Upper bounds (inclusive) of the European AQI bands
const AQI_GOOD_MAX: u32 = 20;
const AQI_FAIR_MAX: u32 = 40;
const AQI_MODERATE_MAX: u32 = 60;
const AQI_POOR_MAX: u32 = 80;
const AQI_VERY_POOR_MAX: u32 = 100;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    current: CurrentBlock,
}

/// Pollutant readings; any of them may be null near the edge of coverage
#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    #[serde(default)]
    european_aqi: Option<f64>,
    #[serde(default)]
    pm10: Option<f64>,
    #[serde(default)]
    pm2_5: Option<f64>,
    #[serde(default)]
    nitrogen_dioxide: Option<f64>,
    #[serde(default)]
    ozone: Option<f64>,
}

/// Client for the air quality endpoint
#[derive(Debug, Clone)]
pub struct AirQualityClient {
    client: Client,
    base_url: String,
}

impl AirQualityClient {
    /// Creates a client against `base_url` using a shared HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetches current air quality at a coordinate
    pub async fn fetch_air_quality(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQuality, SourceError> {
        let query = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("timezone", "auto".to_string()),
        ];
        let response: ApiResponse = get_json(&self.client, RESOURCE, &self.base_url, &query).await?;
        parse_response(response, latitude, longitude)
    }
}

fn parse_response(
    response: ApiResponse,
    latitude: f64,
    longitude: f64,
) -> Result<AirQuality, SourceError> {
    let current = response.current;
    let european_aqi = current.european_aqi.map(|aqi| aqi.max(0.0).round() as u32);

    Ok(AirQuality {
        latitude,
        longitude,
        observed_at: parse_local_time(RESOURCE, &current.time)?,
        european_aqi,
        category: categorize(european_aqi),
        pm2_5: current.pm2_5,
        pm10: current.pm10,
        ozone: current.ozone,
        nitrogen_dioxide: current.nitrogen_dioxide,
    })
}

/// Maps a European AQI reading to its band
pub fn categorize(aqi: Option<u32>) -> AqiCategory {
    match aqi {
        Some(value) if value <= AQI_GOOD_MAX => AqiCategory::Good,
        Some(value) if value <= AQI_FAIR_MAX => AqiCategory::Fair,
        Some(value) if value <= AQI_MODERATE_MAX => AqiCategory::Moderate,
        Some(value) if value <= AQI_POOR_MAX => AqiCategory::Poor,
        Some(value) if value <= AQI_VERY_POOR_MAX => AqiCategory::VeryPoor,
        Some(_) => AqiCategory::ExtremelyPoor,
        None => AqiCategory::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_json;

    const VALID_RESPONSE: &str = r#"{
        "latitude": 51.5,
        "longitude": -0.099999905,
        "generationtime_ms": 0.2,
        "utc_offset_seconds": 3600,
        "timezone": "Europe/London",
        "timezone_abbreviation": "BST",
        "elevation": 23.0,
        "current_units": {
            "time": "iso8601",
            "interval": "seconds",
            "european_aqi": "EAQI",
            "pm10": "μg/m³",
            "pm2_5": "μg/m³",
            "nitrogen_dioxide": "μg/m³",
            "ozone": "μg/m³"
        },
        "current": {
            "time": "2024-07-15T14:00",
            "interval": 3600,
            "european_aqi": 34,
            "pm10": 14.2,
            "pm2_5": 8.9,
            "nitrogen_dioxide": 21.3,
            "ozone": 61.0
        }
    }"#;

    #[test]
    fn test_parse_valid_response() {
        let response: ApiResponse = parse_json(RESOURCE, VALID_RESPONSE).unwrap();
        let air = parse_response(response, 51.51, -0.13).expect("Failed to parse air quality");

        assert_eq!(air.european_aqi, Some(34));
        assert_eq!(air.category, AqiCategory::Fair);
        assert_eq!(air.pm2_5, Some(8.9));
        assert_eq!(air.pm10, Some(14.2));
        assert_eq!(air.ozone, Some(61.0));
        assert_eq!(air.nitrogen_dioxide, Some(21.3));
        assert!((air.latitude - 51.51).abs() < 0.0001);
    }

    #[test]
    fn test_null_readings_are_unknown() {
        let body = r#"{"current": {"time": "2024-07-15T14:00", "european_aqi": null, "pm10": null}}"#;
        let response: ApiResponse = parse_json(RESOURCE, body).unwrap();
        let air = parse_response(response, 0.0, 0.0).unwrap();

        assert_eq!(air.european_aqi, None);
        assert_eq!(air.category, AqiCategory::Unknown);
        assert!(air.pm10.is_none());
        assert!(air.pm2_5.is_none());
    }

    #[test]
    fn test_aqi_band_boundaries() {
        assert_eq!(categorize(Some(0)), AqiCategory::Good);
        assert_eq!(categorize(Some(20)), AqiCategory::Good);
        assert_eq!(categorize(Some(21)), AqiCategory::Fair);
        assert_eq!(categorize(Some(40)), AqiCategory::Fair);
        assert_eq!(categorize(Some(41)), AqiCategory::Moderate);
        assert_eq!(categorize(Some(60)), AqiCategory::Moderate);
        assert_eq!(categorize(Some(61)), AqiCategory::Poor);
        assert_eq!(categorize(Some(80)), AqiCategory::Poor);
        assert_eq!(categorize(Some(81)), AqiCategory::VeryPoor);
        assert_eq!(categorize(Some(100)), AqiCategory::VeryPoor);
        assert_eq!(categorize(Some(101)), AqiCategory::ExtremelyPoor);
        assert_eq!(categorize(None), AqiCategory::Unknown);
    }

    #[test]
    fn test_missing_current_block_is_parse_error() {
        let result = parse_json::<ApiResponse>(RESOURCE, r#"{"latitude": 1.0}"#);
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }
}
