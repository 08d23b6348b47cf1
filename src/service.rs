//! Query facade consumed by an HTTP layer
//!
//! Every method returns a well-formed value. Failures below this layer are
//! logged and replaced with an empty object, except [`HealthTrendService::refresh_all_trends`]
//! which reports the error so the caller knows the refresh did not happen.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::actors::ActorSystem;
use crate::config::ServiceConfiguration;
use crate::model::{
    HealthTrendComparisonReport, HealthTrendData, ServiceSummary, SystemHealthOverview,
};

const HOUR: Duration = Duration::from_secs(60 * 60);

fn hours_window(hours: u32) -> Duration {
    HOUR * hours
}

#[derive(Clone)]
pub struct HealthTrendService {
    system: ActorSystem,
    services: Vec<ServiceConfiguration>,
}

impl HealthTrendService {
    pub fn new(system: ActorSystem, services: Vec<ServiceConfiguration>) -> Self {
        Self { system, services }
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Trend of one service over the last `hours`, served from cache when fresh
    #[instrument(skip(self))]
    pub async fn get_service_trend(&self, service_id: &str, hours: u32) -> HealthTrendData {
        let window = hours_window(hours);
        match self.system.trend(service_id).calculate_trend(window).await {
            Ok(trend) => trend,
            Err(e) => {
                error!("failed to get service trend: {:#}", e);
                HealthTrendData::empty_with_sla(
                    service_id,
                    window,
                    Utc::now(),
                    self.system.engine().sla_target(),
                )
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get_service_trend_history(&self, service_id: &str, count: usize) -> Vec<HealthTrendData> {
        self.system
            .trend(service_id)
            .get_trend_history(count)
            .await
            .unwrap_or_else(|e| {
                error!("failed to get service trend history: {:#}", e);
                Vec::new()
            })
    }

    #[instrument(skip(self))]
    pub async fn get_system_overview(&self) -> SystemHealthOverview {
        self.system
            .aggregator()
            .get_system_overview()
            .await
            .unwrap_or_else(|e| {
                error!("failed to get system overview: {:#}", e);
                SystemHealthOverview::empty(0, Utc::now())
            })
    }

    #[instrument(skip(self))]
    pub async fn compare_services(&self, service_ids: Vec<String>, hours: u32) -> HealthTrendComparisonReport {
        let window = hours_window(hours);
        if service_ids.is_empty() {
            warn!("no service ids provided for comparison");
            return HealthTrendComparisonReport::empty(window, Utc::now());
        }

        let joined = service_ids.join(", ");
        self.system
            .aggregator()
            .compare_service_trends(service_ids, window)
            .await
            .unwrap_or_else(|e| {
                error!(services = %joined, "failed to compare services: {:#}", e);
                HealthTrendComparisonReport::empty(window, Utc::now())
            })
    }

    #[instrument(skip(self))]
    pub async fn refresh_all_trends(&self) -> Result<()> {
        info!("starting refresh of all trends");
        self.system
            .aggregator()
            .refresh_all_trends()
            .await
            .context("failed to refresh all trends")?;
        info!("refreshed all trends");
        Ok(())
    }

    /// Configured services with their most recent probe result
    pub async fn list_services(&self) -> Vec<ServiceSummary> {
        let mut summaries = Vec::with_capacity(self.services.len());

        for service in &self.services {
            let last_check_result = match self.system.monitor(&service.id).get_last_record().await {
                Ok(record) => record,
                Err(e) => {
                    warn!(service = %service.id, "failed to fetch last check: {:#}", e);
                    None
                }
            };

            summaries.push(ServiceSummary {
                id: service.id.clone(),
                name: service.name.clone(),
                service_type: service.service_type,
                last_check_result,
            });
        }

        summaries
    }
}
