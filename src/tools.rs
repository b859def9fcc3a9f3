//! Tool requests and their JSON responses
//!
//! A request names a tool and its arguments:
//!
//! ```json
//! {"tool": "forecast", "arguments": {"location": "Paris", "days": 5}}
//! ```
//!
//! Every response is a single JSON object with `ok` set. Stale data is still
//! a success and carries a `note` saying when it was fetched. A request may
//! carry an `id` of any JSON type, which is echoed on its response.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cache::{FetchError, FetchOutcome, Origin};
use crate::data::SourceError;
use crate::service::WeatherService;

fn default_days() -> u8 {
    3
}

/// A tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    CurrentWeather {
        location: String,
    },
    Forecast {
        location: String,
        #[serde(default = "default_days")]
        days: u8,
    },
    AirQuality {
        location: String,
    },
    CacheStatus,
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::CurrentWeather { .. } => "current_weather",
            ToolRequest::Forecast { .. } => "forecast",
            ToolRequest::AirQuality { .. } => "air_quality",
            ToolRequest::CacheStatus => "cache_status",
        }
    }

    fn location(&self) -> Option<&str> {
        match self {
            ToolRequest::CurrentWeather { location }
            | ToolRequest::Forecast { location, .. }
            | ToolRequest::AirQuality { location } => Some(location),
            ToolRequest::CacheStatus => None,
        }
    }
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn success(origin: Option<Origin>, data: Value, note: Option<String>) -> Self {
        Self {
            id: None,
            ok: true,
            origin,
            data: Some(data),
            note,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            id: None,
            ok: false,
            origin: None,
            data: None,
            note: None,
            error: Some(error.into()),
        }
    }

    /// Echoes the caller's request id
    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }
}

/// Runs one tool request against the service
pub async fn handle(service: &WeatherService, request: ToolRequest) -> ToolResponse {
    if let Some(location) = request.location() {
        if location.trim().is_empty() {
            return ToolResponse::failure("location must not be empty");
        }
    }

    info!(tool = request.name(), location = request.location(), "handling tool request");

    match request {
        ToolRequest::CurrentWeather { location } => {
            match service.current_conditions(&location).await {
                Ok(outcome) => outcome_response("weather", &location, outcome, service.now()),
                Err(err) => error_response(&location, &err),
            }
        }
        ToolRequest::Forecast { location, days } => {
            match service.forecast(&location, days).await {
                Ok(outcome) => outcome_response("forecast", &location, outcome, service.now()),
                Err(err) => error_response(&location, &err),
            }
        }
        ToolRequest::AirQuality { location } => match service.air_quality(&location).await {
            Ok(both) => {
                let now = service.now();
                let notes: Vec<String> = [
                    stale_note("weather", &location, &both.primary, now),
                    stale_note("air quality", &location, &both.secondary, now),
                ]
                .into_iter()
                .flatten()
                .collect();
                let note = (!notes.is_empty()).then(|| notes.join(" "));
                let data = json!({
                    "conditions": both.primary.value,
                    "air_quality": both.secondary.value,
                });
                let origin = both.primary.origin.weaker(both.secondary.origin);
                ToolResponse::success(Some(origin), data, note)
            }
            Err(err) => error_response(&location, &err),
        },
        ToolRequest::CacheStatus => {
            let entries = service.cache_status();
            ToolResponse::success(None, json!({ "entries": entries }), None)
        }
    }
}

fn outcome_response<T: Serialize>(
    what: &str,
    location: &str,
    outcome: FetchOutcome<T>,
    now: DateTime<Utc>,
) -> ToolResponse {
    let note = stale_note(what, location, &outcome, now);
    match serde_json::to_value(&outcome.value) {
        Ok(data) => ToolResponse::success(Some(outcome.origin), data, note),
        Err(err) => ToolResponse::failure(format!("could not encode {} data: {}", what, err)),
    }
}

/// Advisory for data served from an expired entry, aged as of `now`
pub fn stale_note<T>(
    what: &str,
    location: &str,
    outcome: &FetchOutcome<T>,
    now: DateTime<Utc>,
) -> Option<String> {
    outcome.is_stale().then(|| {
        format!(
            "Live {} data for '{}' is unavailable; showing data fetched {}.",
            what,
            location.trim(),
            describe_age(outcome.fetched_at, now)
        )
    })
}

fn describe_age(fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - fetched_at).num_minutes().max(0);
    let when = fetched_at.format("%Y-%m-%d %H:%M UTC");
    match minutes {
        0 => format!("at {} (under a minute ago)", when),
        1 => format!("at {} (1 minute ago)", when),
        m if m < 120 => format!("at {} ({} minutes ago)", when, m),
        m => format!("at {} ({} hours ago)", when, m / 60),
    }
}

/// User-facing message for a lookup that had nothing to serve
pub fn error_message(location: &str, err: &FetchError<SourceError>) -> String {
    let upstream = err.upstream();
    match upstream {
        SourceError::NotFound(_) => format!("No location found matching '{}'.", location.trim()),
        _ if upstream.is_transport() && upstream.is_retryable() => format!(
            "The {} service is unreachable and nothing is cached for '{}'. Try again shortly.",
            upstream.resource(),
            location.trim()
        ),
        _ if upstream.is_transport() => format!(
            "The {} service rejected the request for '{}': {}.",
            upstream.resource(),
            location.trim(),
            upstream
        ),
        _ => format!(
            "The {} service failed for '{}': {}. Try again shortly.",
            upstream.resource(),
            location.trim(),
            upstream
        ),
    }
}

fn error_response(location: &str, err: &FetchError<SourceError>) -> ToolResponse {
    warn!(key = err.key(), error = %err, "lookup failed");
    ToolResponse::failure(error_message(location, err))
}
