//! Integration tests for ServiceMonitor probing and record queries

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use health_trends::model::Status;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{http_service, memory_system, minute_records, seed_monitor};

#[tokio::test]
async fn test_probe_records_and_broadcasts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let (system, _store) = memory_system();
    let mut events = system.subscribe();
    let monitor = system.monitor("api");
    monitor
        .register(http_service("api", &format!("{}/health", server.uri())))
        .await
        .unwrap();

    let record = monitor.probe().await.unwrap();
    assert_eq!(record.status, Status::Healthy);
    assert!(record.error_message.is_none());

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.service_id, "api");
    assert_eq!(event.record, record);

    assert_eq!(monitor.get_record_count().await.unwrap(), 1);
    assert_eq!(monitor.get_last_record().await.unwrap(), Some(record));

    system.shutdown().await;
}

#[tokio::test]
async fn test_unexpected_status_is_critical_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let (system, _store) = memory_system();
    let monitor = system.monitor("api");
    monitor.register(http_service("api", &server.uri())).await.unwrap();

    let record = monitor.probe().await.unwrap();
    assert_eq!(record.status, Status::Critical);
    assert_eq!(
        record.error_message.as_deref(),
        Some("Unexpected status code: 503. Response: maintenance")
    );

    system.shutdown().await;
}

#[tokio::test]
async fn test_unregistered_monitor_refuses_probe() {
    let (system, _store) = memory_system();
    let monitor = system.monitor("ghost");

    assert!(monitor.probe().await.is_err());
    assert_matches!(monitor.get_configuration().await, Ok(None));
    assert_eq!(monitor.get_record_count().await.unwrap(), 0);

    system.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_foreign_id() {
    let (system, _store) = memory_system();
    let monitor = system.monitor("api");

    let result = monitor.register(http_service("other", "http://localhost")).await;
    assert!(result.is_err());
    assert_matches!(monitor.get_configuration().await, Ok(None));

    system.shutdown().await;
}

#[tokio::test]
async fn test_statistics_and_cleanup() {
    let (system, store) = memory_system();
    let now = Utc::now();
    seed_monitor(store.as_ref(), http_service("api", "http://localhost"), minute_records(7, 3, now)).await;

    let monitor = system.monitor("api");
    let stats = monitor
        .get_statistics(now - chrono::Duration::hours(1), now)
        .await
        .unwrap();
    assert_eq!(stats.total_records, 10);
    assert_eq!(stats.failure_count, 3);
    assert!((stats.availability_percentage - 70.0).abs() < 1e-9);
    assert_eq!(stats.average_response_time, Duration::from_millis(100));
    assert_eq!(stats.last_record, Some(now));

    // the five oldest records are at or before now - 5 min
    let removed = monitor
        .cleanup_old_records(now - chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(removed, 5);
    assert_eq!(monitor.get_record_count().await.unwrap(), 5);

    let recent = monitor.get_recent_records(Duration::from_secs(3600)).await.unwrap();
    assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    system.shutdown().await;
}
