//! End-to-end service behaviour through the public API
//!
//! Uses an in-process upstream and a manual clock so expiry and outages can
//! be staged without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;

use weather_lookup::cache::{CacheStore, FetchCoordinator, ManualClock, Origin};
use weather_lookup::data::{
    AirQuality, AqiCategory, CurrentConditions, Forecast, Location, SourceError, WeatherCondition,
    WeatherSource,
};
use weather_lookup::service::{FetchStrategy, WeatherService};
use weather_lookup::tools::{handle, ToolRequest};

const TTL: Duration = Duration::from_secs(600);

#[derive(Default)]
struct SlowUpstream {
    locate_calls: AtomicUsize,
    weather_calls: AtomicUsize,
    air_calls: AtomicUsize,
    down: AtomicBool,
}

impl SlowUpstream {
    async fn respond(&self, resource: &'static str) -> Result<(), SourceError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.down.load(Ordering::SeqCst) {
            Err(SourceError::Status {
                resource,
                status: 502,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WeatherSource for SlowUpstream {
    async fn locate(&self, name: &str) -> Result<Location, SourceError> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        self.respond("geocoding").await?;
        Ok(Location {
            name: name.to_string(),
            country: Some("France".to_string()),
            latitude: 48.85341,
            longitude: 2.3488,
            timezone: Some("Europe/Paris".to_string()),
        })
    }

    async fn current_conditions(
        &self,
        location: &Location,
    ) -> Result<CurrentConditions, SourceError> {
        let call = self.weather_calls.fetch_add(1, Ordering::SeqCst);
        self.respond("weather").await?;
        Ok(CurrentConditions {
            location: location.clone(),
            observed_at: NaiveDate::from_ymd_opt(2024, 7, 15)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap(),
            temperature: 18.0 + call as f64,
            feels_like: 18.0,
            humidity: 70,
            wind_speed: 5.0,
            wind_direction: 90.0,
            condition: WeatherCondition::Rain,
        })
    }

    async fn forecast(&self, location: &Location, _days: u8) -> Result<Forecast, SourceError> {
        self.respond("weather").await?;
        Ok(Forecast {
            location: location.clone(),
            days: Vec::new(),
        })
    }

    async fn air_quality(&self, latitude: f64, longitude: f64) -> Result<AirQuality, SourceError> {
        self.air_calls.fetch_add(1, Ordering::SeqCst);
        self.respond("air quality").await?;
        Ok(AirQuality {
            latitude,
            longitude,
            observed_at: NaiveDate::from_ymd_opt(2024, 7, 15)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap(),
            european_aqi: Some(55),
            category: AqiCategory::Moderate,
            pm2_5: None,
            pm10: None,
            ozone: None,
            nitrogen_dioxide: None,
        })
    }
}

fn build(strategy: FetchStrategy) -> (Arc<WeatherService>, Arc<SlowUpstream>, Arc<ManualClock>) {
    let upstream = Arc::new(SlowUpstream::default());
    let clock = Arc::new(ManualClock::at_epoch());
    let coordinator =
        FetchCoordinator::with_store(Arc::new(CacheStore::new()), clock.clone(), TTL);
    let service = WeatherService::new(upstream.clone(), coordinator, strategy);
    (Arc::new(service), upstream, clock)
}

#[tokio::test(start_paused = true)]
async fn test_paris_timeline() {
    let (service, upstream, clock) = build(FetchStrategy::LastWriteWins);

    let first = service.current_conditions("Paris").await.unwrap();
    assert_eq!(first.origin, Origin::Fresh);

    clock.advance(Duration::from_secs(300));
    let second = service.current_conditions("Paris").await.unwrap();
    assert_eq!(second.origin, Origin::Cached);
    assert_eq!(second.value, first.value);
    assert_eq!(upstream.weather_calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(400));
    upstream.down.store(true, Ordering::SeqCst);
    let third = service.current_conditions("Paris").await.unwrap();
    assert_eq!(third.origin, Origin::Stale);
    assert_eq!(third.value, first.value);

    upstream.down.store(false, Ordering::SeqCst);
    let fourth = service.current_conditions("Paris").await.unwrap();
    assert_eq!(fourth.origin, Origin::Fresh);
    assert!((fourth.value.temperature - 20.0).abs() < 1e-9);

    // The location entry expired alongside the weather and was refreshed too
    let status = service.cache_status();
    assert_eq!(status.len(), 2);
    assert!(status.iter().all(|s| s.age_seconds == 0 && !s.expired));
    assert_eq!(upstream.locate_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_shares_upstream_calls() {
    let (service, upstream, _clock) = build(FetchStrategy::Coalesce);

    let outcomes = join_all((0..8).map(|_| service.current_conditions("Paris"))).await;

    assert!(outcomes.iter().all(|o| o.is_ok()));
    let first = outcomes[0].as_ref().unwrap();
    assert!(outcomes
        .iter()
        .all(|o| o.as_ref().unwrap().value == first.value));
    assert_eq!(upstream.locate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.weather_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_last_write_wins_fetches_per_caller() {
    let (service, upstream, _clock) = build(FetchStrategy::LastWriteWins);

    let outcomes = join_all((0..4).map(|_| service.current_conditions("Paris"))).await;

    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(upstream.locate_calls.load(Ordering::SeqCst), 4);
    assert_eq!(service.cache_status().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_cold_failure_reaches_every_caller() {
    let (service, upstream, _clock) = build(FetchStrategy::Coalesce);
    upstream.down.store(true, Ordering::SeqCst);

    let outcomes = join_all((0..5).map(|_| service.air_quality("Paris"))).await;

    for outcome in &outcomes {
        let err = outcome.as_ref().unwrap_err();
        assert_eq!(err.key(), "location:paris");
        assert_eq!(err.upstream().resource(), "geocoding");
    }
    assert_eq!(upstream.locate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.weather_calls.load(Ordering::SeqCst), 0);
    assert_eq!(upstream.air_calls.load(Ordering::SeqCst), 0);
    assert!(service.cache_status().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_tool_requests_from_spawned_tasks() {
    let (service, _upstream, _clock) = build(FetchStrategy::Coalesce);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                handle(
                    &service,
                    ToolRequest::AirQuality {
                        location: "Paris".to_string(),
                    },
                )
                .await
            })
        })
        .collect();

    for task in tasks {
        let response = task.await.unwrap();
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["air_quality"]["european_aqi"], 55);
    }

    let keys: Vec<String> = service.cache_status().into_iter().map(|s| s.key).collect();
    assert_eq!(
        keys,
        vec!["airquality:48.85:2.35", "location:paris", "weather:paris"]
    );
}
