//! Cached weather lookups
//!
//! [`WeatherService`] puts every upstream call behind one shared cache. Keys
//! follow `"<kind>:<normalized param>"`:
//!
//! - `location:<name>`: geocoder result
//! - `weather:<name>`: current conditions
//! - `forecast:<name>:<days>`: daily forecast
//! - `airquality:<lat>:<lon>`: air quality, coordinates rounded to 0.01°
//!
//! Current conditions depend on the location lookup, and air quality depends
//! on current conditions, so a place the geocoder cannot resolve (and has
//! never resolved) fails before any weather or air quality request is made.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::cache::{
    then_fetch, CoalescingCoordinator, Dependent, EntryStatus, FetchCoordinator, FetchError,
    FetchOutcome,
};
use crate::cli::Config;
use crate::data::{
    weather::clamp_days, AirQuality, CurrentConditions, Forecast, Location, OpenMeteo,
    SourceError, WeatherSource,
};

/// Result of a cached lookup
pub type Lookup<T> = Result<FetchOutcome<T>, FetchError<SourceError>>;

/// What happens when several requests miss the same key at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FetchStrategy {
    /// Each request fetches on its own; the last write wins
    #[default]
    LastWriteWins,
    /// Later requests wait for the fetch already in flight
    Coalesce,
}

enum Coordinator {
    LastWriteWins(FetchCoordinator<Value>),
    Coalesce(CoalescingCoordinator<Value, SourceError>),
}

impl Coordinator {
    async fn get<Fut>(&self, key: &str, fetch: Fut) -> Lookup<Value>
    where
        Fut: Future<Output = Result<Value, SourceError>> + Send + 'static,
    {
        match self {
            Coordinator::LastWriteWins(coordinator) => coordinator.get(key, move || fetch).await,
            Coordinator::Coalesce(coordinator) => coordinator.get(key, move || fetch).await,
        }
    }

    fn introspect(&self) -> Vec<EntryStatus> {
        match self {
            Coordinator::LastWriteWins(coordinator) => coordinator.introspect(),
            Coordinator::Coalesce(coordinator) => coordinator.introspect(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        match self {
            Coordinator::LastWriteWins(coordinator) => coordinator.now(),
            Coordinator::Coalesce(coordinator) => coordinator.inner().now(),
        }
    }
}

/// Weather lookups served through a read-through cache
pub struct WeatherService {
    coordinator: Coordinator,
    source: Arc<dyn WeatherSource>,
}

impl WeatherService {
    /// Creates a service over `source`, caching through `coordinator`
    pub fn new(
        source: Arc<dyn WeatherSource>,
        coordinator: FetchCoordinator<Value>,
        strategy: FetchStrategy,
    ) -> Self {
        let coordinator = match strategy {
            FetchStrategy::LastWriteWins => Coordinator::LastWriteWins(coordinator),
            FetchStrategy::Coalesce => {
                Coordinator::Coalesce(CoalescingCoordinator::new(coordinator))
            }
        };
        Self {
            coordinator,
            source,
        }
    }

    /// Creates a service talking to Open-Meteo with a fresh cache
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let source = OpenMeteo::new(config.endpoints.clone(), config.http_timeout)?;
        Ok(Self::new(
            Arc::new(source),
            FetchCoordinator::new(config.cache_ttl),
            config.strategy,
        ))
    }

    /// Resolves a place name to coordinates
    pub async fn location(&self, name: &str) -> Lookup<Location> {
        let query = normalize_location(name);
        let key = format!("location:{}", query);
        let source = Arc::clone(&self.source);

        self.cached(&key, async move { source.locate(&query).await })
            .await
    }

    /// Current conditions for a place
    ///
    /// A stale location is still good enough to look up the weather.
    pub async fn current_conditions(&self, name: &str) -> Lookup<CurrentConditions> {
        let key = format!("weather:{}", normalize_location(name));

        let dependent = then_fetch(self.location(name), |location| {
            let location = location.clone();
            let source = Arc::clone(&self.source);
            async move {
                self.cached(&key, async move { source.current_conditions(&location).await })
                    .await
            }
        })
        .await?;

        Ok(dependent.secondary)
    }

    /// Daily forecast for a place, `days` clamped to what the upstream serves
    pub async fn forecast(&self, name: &str, days: u8) -> Lookup<Forecast> {
        let days = clamp_days(days);
        let key = format!("forecast:{}:{}", normalize_location(name), days);

        let dependent = then_fetch(self.location(name), |location| {
            let location = location.clone();
            let source = Arc::clone(&self.source);
            async move {
                self.cached(&key, async move { source.forecast(&location, days).await })
                    .await
            }
        })
        .await?;

        Ok(dependent.secondary)
    }

    /// Air quality near a place, located through its current conditions
    ///
    /// Fails with the weather lookup's error, without contacting the air
    /// quality upstream, when the weather lookup has nothing to offer.
    pub async fn air_quality(
        &self,
        name: &str,
    ) -> Result<Dependent<CurrentConditions, AirQuality>, FetchError<SourceError>> {
        then_fetch(self.current_conditions(name), |conditions| {
            let latitude = round_coordinate(conditions.location.latitude);
            let longitude = round_coordinate(conditions.location.longitude);
            let key = air_quality_key(latitude, longitude);
            let source = Arc::clone(&self.source);
            async move {
                self.cached(&key, async move { source.air_quality(latitude, longitude).await })
                    .await
            }
        })
        .await
    }

    /// Age and freshness of every cached key
    pub fn cache_status(&self) -> Vec<EntryStatus> {
        self.coordinator.introspect()
    }

    /// Current time on the cache's clock, the reference for entry ages
    pub fn now(&self) -> DateTime<Utc> {
        self.coordinator.now()
    }

    /// Runs `fetch` through the cache, storing its payload as JSON
    async fn cached<T, Fut>(&self, key: &str, fetch: Fut) -> Lookup<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<T, SourceError>> + Send + 'static,
    {
        let outcome = self
            .coordinator
            .get(key, async move {
                let payload = fetch.await?;
                serde_json::to_value(payload).map_err(|source| SourceError::Parse {
                    resource: "cache",
                    source,
                })
            })
            .await?;

        outcome.try_map(serde_json::from_value).map_err(|source| {
            FetchError::new(
                key,
                SourceError::Parse {
                    resource: "cache",
                    source,
                },
            )
        })
    }
}

/// Lowercases and collapses whitespace so equivalent names share a key
pub fn normalize_location(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Rounds to two decimals (about 1 km), folding -0.0 into 0.0
pub fn round_coordinate(value: f64) -> f64 {
    (value * 100.0).round() / 100.0 + 0.0
}

/// Cache key for air quality at an already rounded coordinate
pub fn air_quality_key(latitude: f64, longitude: f64) -> String {
    format!("airquality:{:.2}:{:.2}", latitude, longitude)
}
