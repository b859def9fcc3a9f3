//! Open-Meteo weather API client
//!
//! This module fetches current conditions and daily forecasts from the
//! Open-Meteo forecast endpoint and parses them into our payload types.

use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use super::{
    get_json, parse_local_time, CurrentConditions, DailyForecast, Forecast, Location, SourceError,
    WeatherCondition,
};

/// Name used for this upstream in errors and logs
pub const RESOURCE: &str = "weather";

/// Base URL for the Open-Meteo forecast API
pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Longest forecast Open-Meteo will return
pub const MAX_FORECAST_DAYS: u8 = 16;

const CURRENT_FIELDS: &str =
    "temperature_2m,relative_humidity_2m,apparent_temperature,weather_code,wind_speed_10m,wind_direction_10m";

const DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum,precipitation_probability_max";

/// Client for fetching weather data from Open-Meteo API
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    base_url: String,
}

impl WeatherClient {
    /// Creates a client against `base_url` using a shared HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Fetch current conditions for a geocoded location
    pub async fn fetch_current(&self, location: &Location) -> Result<CurrentConditions, SourceError> {
        let mut query = coordinate_query(location);
        query.push(("current", CURRENT_FIELDS.to_string()));

        let response: CurrentResponse = get_json(&self.client, RESOURCE, &self.base_url, &query).await?;
        parse_current(response, location)
    }

    /// Fetch a daily forecast, `days` clamped to 1..=16
    pub async fn fetch_forecast(&self, location: &Location, days: u8) -> Result<Forecast, SourceError> {
        let mut query = coordinate_query(location);
        query.push(("daily", DAILY_FIELDS.to_string()));
        query.push(("forecast_days", clamp_days(days).to_string()));

        let response: ForecastResponse = get_json(&self.client, RESOURCE, &self.base_url, &query).await?;
        parse_forecast(response, location)
    }
}

/// Keeps a requested forecast length inside what the API accepts
pub fn clamp_days(days: u8) -> u8 {
    days.clamp(1, MAX_FORECAST_DAYS)
}

fn coordinate_query(location: &Location) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", location.latitude.to_string()),
        ("longitude", location.longitude.to_string()),
        ("timezone", "auto".to_string()),
    ]
}

/// Parse the Open-Meteo current-conditions response
fn parse_current(
    response: CurrentResponse,
    location: &Location,
) -> Result<CurrentConditions, SourceError> {
    let current = response.current;

    Ok(CurrentConditions {
        location: location.clone(),
        observed_at: parse_local_time(RESOURCE, &current.time)?,
        temperature: current.temperature_2m,
        feels_like: current.apparent_temperature,
        humidity: current.relative_humidity_2m.clamp(0.0, 100.0) as u8,
        wind_speed: current.wind_speed_10m,
        wind_direction: current.wind_direction_10m,
        condition: weather_code_to_condition(current.weather_code),
    })
}

/// Parse the daily arrays into one entry per day
fn parse_forecast(response: ForecastResponse, location: &Location) -> Result<Forecast, SourceError> {
    let daily = response.daily;
    let len = daily.time.len();

    // Validate that all arrays have the same length
    if daily.weather_code.len() != len
        || daily.temperature_2m_max.len() != len
        || daily.temperature_2m_min.len() != len
        || daily.precipitation_sum.len() != len
        || daily.precipitation_probability_max.len() != len
    {
        return Err(SourceError::MissingField {
            resource: RESOURCE,
            field: "daily arrays have inconsistent lengths".to_string(),
        });
    }

    let mut days = Vec::with_capacity(len);

    for i in 0..len {
        let date = NaiveDate::parse_from_str(&daily.time[i], "%Y-%m-%d").map_err(|_| {
            SourceError::MissingField {
                resource: RESOURCE,
                field: format!("valid date (got '{}')", daily.time[i]),
            }
        })?;
        let (temperature_max, temperature_min) =
            match (daily.temperature_2m_max[i], daily.temperature_2m_min[i]) {
                (Some(max), Some(min)) => (max, min),
                _ => {
                    return Err(SourceError::MissingField {
                        resource: RESOURCE,
                        field: format!("temperature for {}", date),
                    })
                }
            };

        days.push(DailyForecast {
            date,
            condition: weather_code_to_condition(daily.weather_code[i].unwrap_or(u8::MAX)),
            temperature_max,
            temperature_min,
            precipitation: daily.precipitation_sum[i].unwrap_or(0.0),
            precipitation_probability: daily.precipitation_probability_max[i]
                .map(|p| p.clamp(0.0, 100.0) as u8),
        });
    }

    Ok(Forecast {
        location: location.clone(),
        days,
    })
}

/// Map WMO weather code to WeatherCondition enum
///
/// Weather codes from WMO (World Meteorological Organization):
/// - 0: Clear sky
/// - 1-3: Partly cloudy
/// - 45, 48: Fog
/// - 51-55: Drizzle
/// - 56-57: Freezing drizzle
/// - 61-65: Rain
/// - 66-67: Freezing rain
/// - 71-77: Snow
/// - 80-82: Rain showers
/// - 85-86: Snow showers
/// - 95-99: Thunderstorm
pub fn weather_code_to_condition(code: u8) -> WeatherCondition {
    match code {
        0 => WeatherCondition::Clear,
        1..=3 => WeatherCondition::PartlyCloudy,
        45 | 48 => WeatherCondition::Fog,
        51..=55 | 61..=65 | 80..=82 => WeatherCondition::Rain,
        56..=57 | 66..=67 => WeatherCondition::Showers,
        71..=77 | 85..=86 => WeatherCondition::Snow,
        95..=99 => WeatherCondition::Thunderstorm,
        _ => WeatherCondition::Cloudy, // Default for unknown codes
    }
}

/// Open-Meteo response with current conditions
#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    time: String,
    temperature_2m: f64,
    relative_humidity_2m: f64,
    apparent_temperature: f64,
    weather_code: u8,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

/// Open-Meteo response with daily aggregates
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    daily: DailyBlock,
}

/// Daily values can be null for days the model does not cover
#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    weather_code: Vec<Option<u8>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    precipitation_probability_max: Vec<Option<f64>>,
}
