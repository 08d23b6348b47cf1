//! End-to-end test: HTTP probes through to the comparison report

use std::sync::Arc;

use health_trends::HealthTrendService;
use health_trends::model::Status;
use health_trends::storage::MemoryBackend;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{ScriptedProber, http_service, system_with, test_settings};

#[tokio::test]
async fn test_two_services_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let services = vec![
        http_service("ok", &format!("{}/ok", server.uri())),
        http_service("broken", &format!("{}/broken", server.uri())),
    ];

    let system = system_with(Arc::new(MemoryBackend::new()), ScriptedProber::default(), test_settings());
    let aggregator = system.aggregator();
    for service in &services {
        aggregator.register_service(service.clone()).await.unwrap();
    }

    for _ in 0..12 {
        system.monitor("ok").probe().await.unwrap();
        system.monitor("broken").probe().await.unwrap();
    }

    let facade = HealthTrendService::new(system.clone(), services);

    let summaries = facade.list_services().await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].last_check_result.as_ref().map(|r| r.status), Some(Status::Healthy));
    assert_eq!(summaries[1].last_check_result.as_ref().map(|r| r.status), Some(Status::Critical));

    let report = facade.compare_services(vec!["ok".into(), "broken".into()], 1).await;
    assert_eq!(report.service_comparisons.len(), 2);
    assert_eq!(report.service_comparisons[0].service_id, "ok");
    assert_eq!(report.service_comparisons[1].service_id, "broken");
    assert_eq!(report.health_ranking.healthiest_services, vec!["ok".to_string(), "broken".to_string()]);
    assert_eq!(report.health_ranking.problematic_services, vec!["broken".to_string()]);

    let trend = facade.get_service_trend("broken", 1).await;
    assert_eq!(trend.total_data_points, 12);
    assert_eq!(trend.availability_percentage, 0.0);

    let overview = facade.get_system_overview().await;
    assert_eq!(overview.total_services, 2);
    assert_eq!(overview.healthy_services, 1);

    facade.refresh_all_trends().await.unwrap();
    assert!(!facade.get_service_trend_history("ok", 10).await.is_empty());

    system.shutdown().await;
}
