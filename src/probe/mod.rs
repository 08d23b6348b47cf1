//! Service probes
//!
//! A [`Prober`] turns a service configuration into one health check record.
//! Probes never fail: every problem reaching the target is reported as a
//! `Critical` record carrying the error message.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::config::{ServiceConfiguration, ServiceType};
use crate::model::HealthCheckRecord;

pub use http::HttpProber;

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, config: &ServiceConfiguration) -> HealthCheckRecord;
}

/// Probers keyed by the service type they handle
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probers: HashMap<ServiceType, Arc<dyn Prober>>,
}

impl ProbeRegistry {
    /// Registry with no probers; every probe yields a Critical record
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the HTTP prober installed
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ServiceType::Http, Arc::new(HttpProber::new()));
        registry
    }

    pub fn register(&mut self, service_type: ServiceType, prober: Arc<dyn Prober>) {
        self.probers.insert(service_type, prober);
    }

    pub fn supports(&self, service_type: ServiceType) -> bool {
        self.probers.contains_key(&service_type)
    }

    /// Probe with the prober registered for the service's type
    pub async fn probe(&self, config: &ServiceConfiguration) -> HealthCheckRecord {
        match self.probers.get(&config.service_type) {
            Some(prober) => prober.probe(config).await,
            None => {
                warn!(service = %config.id, service_type = %config.service_type, "no prober for service type");
                HealthCheckRecord::critical(
                    Utc::now(),
                    Duration::ZERO,
                    format!("Unsupported service type: {}", config.service_type),
                )
            }
        }
    }
}

impl std::fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("service_types", &self.probers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    struct AlwaysHealthy;

    #[async_trait]
    impl Prober for AlwaysHealthy {
        async fn probe(&self, _config: &ServiceConfiguration) -> HealthCheckRecord {
            HealthCheckRecord::healthy(Utc::now(), Duration::from_millis(5))
        }
    }

    #[tokio::test]
    async fn test_unsupported_type_is_critical() {
        let registry = ProbeRegistry::with_defaults();
        let mut config = ServiceConfiguration::new("queue", "Queue", "amqp://localhost");
        config.service_type = ServiceType::Rabbitmq;

        assert!(!registry.supports(ServiceType::Rabbitmq));
        let record = registry.probe(&config).await;
        assert_eq!(record.status, Status::Critical);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Unsupported service type: rabbitmq")
        );
    }

    #[tokio::test]
    async fn test_dispatch_by_type() {
        let mut registry = ProbeRegistry::empty();
        registry.register(ServiceType::Db, Arc::new(AlwaysHealthy));

        let mut config = ServiceConfiguration::new("db", "Database", "postgres://localhost");
        config.service_type = ServiceType::Db;

        let record = registry.probe(&config).await;
        assert_eq!(record.status, Status::Healthy);
    }
}
