//! Command-line interface parsing for weather-lookup
//!
//! Every flag has an environment fallback so the tool server can be
//! configured by whatever launches it. [`Config::from_cli`] validates the
//! parsed flags before anything touches the network.

use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::Level;

use crate::data::{air_quality, geocoding, weather, Endpoints};
use crate::logging::LogFormat;
use crate::service::FetchStrategy;

/// Error types for invalid configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid cache TTL: must be at least one second")]
    ZeroTtl,

    #[error("Invalid HTTP timeout: must be at least one second")]
    ZeroTimeout,

    #[error("Invalid log level: '{0}'. Valid levels: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Weather lookups with a read-through cache that survives upstream outages
#[derive(Parser, Debug)]
#[command(name = "weather-lookup")]
#[command(about = "Cached weather, forecast and air quality lookups")]
#[command(version)]
pub struct Cli {
    /// Seconds a cached lookup is served without refetching
    #[arg(long, env = "WEATHER_CACHE_TTL_SECS", default_value_t = 600, global = true)]
    pub cache_ttl: u64,

    /// Seconds before an upstream request is abandoned
    #[arg(long, env = "WEATHER_HTTP_TIMEOUT_SECS", default_value_t = 10, global = true)]
    pub http_timeout: u64,

    /// Share one upstream request between concurrent lookups of the same key
    #[arg(long, env = "WEATHER_COALESCE", global = true)]
    pub coalesce: bool,

    #[arg(long, env = "WEATHER_GEOCODING_URL", default_value = geocoding::DEFAULT_BASE_URL, global = true, hide = true)]
    pub geocoding_url: String,

    #[arg(long, env = "WEATHER_FORECAST_URL", default_value = weather::DEFAULT_BASE_URL, global = true, hide = true)]
    pub weather_url: String,

    #[arg(long, env = "WEATHER_AIR_QUALITY_URL", default_value = air_quality::DEFAULT_BASE_URL, global = true, hide = true)]
    pub air_quality_url: String,

    /// Default log level; RUST_LOG overrides it
    #[arg(long, env = "WEATHER_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log line format on stderr
    #[arg(long, value_enum, env = "WEATHER_LOG_FORMAT", default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Answer newline-delimited JSON tool requests on stdin
    ///
    /// Examples:
    ///   {"tool": "current_weather", "arguments": {"location": "London"}}
    ///   {"tool": "forecast", "arguments": {"location": "Paris", "days": 5}}
    ///   {"tool": "cache_status"}
    Serve,

    /// Print current conditions for a place
    Current {
        /// Place name, e.g. "London"
        location: String,
    },

    /// Print a daily forecast for a place
    Forecast {
        location: String,

        /// Number of days (1-16)
        #[arg(long, short, default_value_t = 3)]
        days: u8,
    },

    /// Print air quality near a place
    AirQuality { location: String },
}

/// Validated settings derived from CLI arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub strategy: FetchStrategy,
    pub endpoints: Endpoints,
    pub log_level: Level,
    pub log_format: LogFormat,
}

/// Parses a log level name, case-insensitively
pub fn parse_log_level(s: &str) -> Result<Level, ConfigError> {
    s.parse::<Level>()
        .map_err(|_| ConfigError::InvalidLogLevel(s.to_string()))
}

impl Config {
    /// Creates a Config from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Config)` when every setting is usable
    /// * `Err(ConfigError)` for a zero TTL or timeout, or an unknown log level
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.cache_ttl == 0 {
            return Err(ConfigError::ZeroTtl);
        }
        if cli.http_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let strategy = if cli.coalesce {
            FetchStrategy::Coalesce
        } else {
            FetchStrategy::LastWriteWins
        };

        Ok(Config {
            cache_ttl: Duration::from_secs(cli.cache_ttl),
            http_timeout: Duration::from_secs(cli.http_timeout),
            strategy,
            endpoints: Endpoints {
                geocoding: cli.geocoding_url.clone(),
                weather: cli.weather_url.clone(),
                air_quality: cli.air_quality_url.clone(),
            },
            log_level: parse_log_level(&cli.log_level)?,
            log_format: cli.log_format,
        })
    }
}
