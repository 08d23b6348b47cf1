//! Integration tests for TrendActor caching, history and refresh

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use health_trends::HealthTrendService;
use health_trends::model::HealthTrendDirection;
use health_trends::storage::MemoryBackend;

use crate::helpers::{ScriptedProber, http_service, memory_system, minute_records, seed_monitor, system_with, test_settings};

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_trend_over_seeded_records() {
    let (system, store) = memory_system();
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(7, 3, Utc::now())).await;

    let trend = system.trend("api").calculate_trend(HOUR).await.unwrap();

    assert_eq!(trend.service_id, "api");
    assert_eq!(trend.time_window, HOUR);
    assert_eq!(trend.total_data_points, 10);
    assert!((trend.availability_percentage - 70.0).abs() < 1e-9);
    assert_eq!(trend.average_response_time, Duration::from_millis(100));
    assert!(trend.overall_health_score > 60.0 && trend.overall_health_score < 80.0);
    assert!(trend.predictions.is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_service_without_records_gets_zeroed_trend() {
    let (system, _store) = memory_system();

    let trend = system.trend("quiet").calculate_trend(HOUR).await.unwrap();

    assert_eq!(trend.total_data_points, 0);
    assert_eq!(trend.availability_percentage, 0.0);
    assert_eq!(trend.overall_health_score, 0.0);
    assert_eq!(trend.health_trend, HealthTrendDirection::Unknown);
    assert!(trend.detected_anomalies.is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_repeated_calculation_is_served_from_cache() {
    let (system, store) = memory_system();
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(20, 0, Utc::now())).await;

    let trend = system.trend("api");
    let first = trend.calculate_trend(HOUR).await.unwrap();
    let second = trend.calculate_trend(HOUR).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(trend.get_trend_history(10).await.unwrap().len(), 1);

    system.shutdown().await;
}

#[tokio::test]
async fn test_cache_expires_after_ttl() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        short_cache_ttl: Duration::from_millis(50),
        ..test_settings()
    };
    let system = system_with(store.clone(), ScriptedProber::default(), settings);
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(20, 0, Utc::now())).await;

    let trend = system.trend("api");
    let first = trend.calculate_trend(HOUR).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let second = trend.calculate_trend(HOUR).await.unwrap();

    assert!(second.calculated_at > first.calculated_at);
    assert_eq!(second.total_data_points, 20);

    system.shutdown().await;
}

#[tokio::test]
async fn test_refresh_populates_history() {
    let (system, store) = memory_system();
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(30, 0, Utc::now())).await;

    let trend = system.trend("api");
    trend.refresh_trend_data().await.unwrap();

    let history = trend.get_trend_history(50).await.unwrap();
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[0].calculated_at <= w[1].calculated_at));

    let latest = trend.get_latest_trend().await.unwrap();
    assert_eq!(latest.total_data_points, 30);

    system.shutdown().await;
}

#[tokio::test]
async fn test_latest_without_history_is_empty_day_trend() {
    let (system, _store) = memory_system();

    let latest = system.trend("fresh").get_latest_trend().await.unwrap();
    assert_eq!(latest.service_id, "fresh");
    assert_eq!(latest.time_window, Duration::from_secs(24 * 3600));
    assert_eq!(latest.total_data_points, 0);

    system.shutdown().await;
}

#[tokio::test]
async fn test_empty_hour_falls_back_to_last_day() {
    let (system, store) = memory_system();
    let two_hours_ago = Utc::now() - chrono::Duration::hours(2);
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(5, 0, two_hours_ago)).await;

    let trend = system.trend("api").calculate_trend(HOUR).await.unwrap();

    assert_eq!(trend.time_window, HOUR);
    assert_eq!(trend.total_data_points, 5);
    assert!(trend.availability_percentage > 99.0);

    system.shutdown().await;
}

#[tokio::test]
async fn test_day_window_uses_long_ttl() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        short_cache_ttl: Duration::from_millis(50),
        long_cache_ttl: Duration::from_secs(60),
        ..test_settings()
    };
    let system = system_with(store.clone(), ScriptedProber::default(), settings);
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(20, 0, Utc::now())).await;

    let trend = system.trend("api");
    let first = trend.calculate_trend(HOUR * 24).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let second = trend.calculate_trend(HOUR * 24).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(trend.get_trend_history(10).await.unwrap().len(), 1);

    system.shutdown().await;
}

#[tokio::test]
async fn test_window_beyond_calendar_range() {
    let (system, store) = memory_system();
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(8, 2, Utc::now())).await;
    let huge = HOUR * 2_400_000_000;

    let trend = system.trend("api").calculate_trend(huge).await.unwrap();
    assert_eq!(trend.time_window, huge);
    assert_eq!(trend.total_data_points, 10);

    let recent = system.monitor("api").get_recent_records(huge).await.unwrap();
    assert_eq!(recent.len(), 10);

    let service = HealthTrendService::new(system.clone(), vec![http_service("api", "http://localhost")]);
    let trend = service.get_service_trend("api", 2_400_000_000).await;
    assert_eq!(trend.total_data_points, 10);

    system.shutdown().await;
}
