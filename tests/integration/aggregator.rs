//! Integration tests for the system-wide aggregator

use std::time::Duration;

use chrono::Utc;
use health_trends::model::AlertSeverity;
use pretty_assertions::assert_eq;

use crate::helpers::{http_service, memory_system, minute_records, seed_monitor};

const HOUR: Duration = Duration::from_secs(3600);

/// One clean service and one failing half the time, both registered
async fn two_services() -> (health_trends::ActorSystem, std::sync::Arc<health_trends::storage::MemoryBackend>) {
    let (system, store) = memory_system();
    let now = Utc::now();
    seed_monitor(store.as_ref(), http_service("steady", "http://localhost/a"), minute_records(40, 0, now)).await;
    seed_monitor(store.as_ref(), http_service("flaky", "http://localhost/b"), minute_records(20, 20, now)).await;

    let aggregator = system.aggregator();
    aggregator.register_service(http_service("steady", "http://localhost/a")).await.unwrap();
    aggregator.register_service(http_service("flaky", "http://localhost/b")).await.unwrap();
    (system, store)
}

#[tokio::test]
async fn test_registered_services_are_listed() {
    let (system, _store) = two_services().await;

    let services: Vec<String> = system.aggregator().list_services().await.unwrap().into_iter().collect();
    assert_eq!(services, vec!["flaky".to_string(), "steady".to_string()]);

    // registering again is idempotent
    system
        .aggregator()
        .register_service(http_service("steady", "http://localhost/a"))
        .await
        .unwrap();
    assert_eq!(system.aggregator().list_services().await.unwrap().len(), 2);

    system.shutdown().await;
}

#[tokio::test]
async fn test_comparison_ranks_services() {
    let (system, _store) = two_services().await;

    let report = system
        .aggregator()
        .compare_service_trends(vec!["flaky".into(), "steady".into(), "unknown".into()], HOUR)
        .await
        .unwrap();

    assert_eq!(report.analysis_window, HOUR);
    assert_eq!(report.service_comparisons.len(), 2);
    assert_eq!(report.service_comparisons[0].service_id, "steady");
    assert_eq!(report.service_comparisons[0].health_rank, 1);
    assert_eq!(report.service_comparisons[1].service_id, "flaky");
    assert_eq!(report.service_comparisons[1].health_rank, 2);
    assert_eq!(report.health_ranking.problematic_services, vec!["flaky".to_string()]);
    assert!(
        report.service_comparisons[1]
            .health_insights
            .iter()
            .any(|i| i.starts_with("Availability below 99%"))
    );

    system.shutdown().await;
}

#[tokio::test]
async fn test_comparison_of_unregistered_ids_is_empty() {
    let (system, _store) = memory_system();

    let report = system
        .aggregator()
        .compare_service_trends(vec!["nobody".into()], HOUR)
        .await
        .unwrap();
    assert!(report.service_comparisons.is_empty());
    assert!(report.health_ranking.healthiest_services.is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_overview_counts_and_alerts() {
    let (system, _store) = two_services().await;

    let overview = system.aggregator().get_system_overview().await.unwrap();

    assert_eq!(overview.total_services, 2);
    assert_eq!(overview.healthy_services, 1);
    assert_eq!(overview.problematic_services, 1);
    assert!(overview.overall_system_health > 60.0 && overview.overall_system_health < 90.0);
    assert_eq!(overview.services_by_trend.values().sum::<usize>(), 2);

    let critical: Vec<_> = overview
        .alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].service_id, "flaky");

    // a second request within the TTL is served from the cache
    let cached = system.aggregator().get_system_overview().await.unwrap();
    assert_eq!(cached, overview);

    system.shutdown().await;
}

#[tokio::test]
async fn test_overview_without_services() {
    let (system, _store) = memory_system();

    let overview = system.aggregator().get_system_overview().await.unwrap();
    assert_eq!(overview.total_services, 0);
    assert_eq!(overview.overall_system_health, 0.0);
    assert!(overview.alerts.is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_refresh_invalidates_overview() {
    let (system, _store) = two_services().await;
    let aggregator = system.aggregator();

    let before = aggregator.get_system_overview().await.unwrap();
    aggregator.refresh_all_trends().await.unwrap();
    let after = aggregator.get_system_overview().await.unwrap();

    assert!(after.generated_at > before.generated_at);
    assert_eq!(after.total_services, 2);

    let history = system.trend("steady").get_trend_history(10).await.unwrap();
    assert!(history.len() >= 2);

    system.shutdown().await;
}
