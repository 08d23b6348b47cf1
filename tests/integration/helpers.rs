//! Helper functions for integration tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use health_trends::{
    ActorSettings, ActorSystem,
    actors::service_monitor::MonitorState,
    config::{ServiceConfiguration, ServiceType, TrendsConfig},
    model::{HealthCheckRecord, Status},
    probe::{ProbeRegistry, Prober},
    storage::{EntityKey, MemoryBackend, StateRow, StateStore},
};

/// Settings with short delays so tests finish quickly
pub fn test_settings() -> ActorSettings {
    ActorSettings {
        idle_timeout: Duration::from_secs(30),
        retry_base_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

/// Prober that replays a scripted list of statuses, then reports Healthy
#[derive(Default)]
pub struct ScriptedProber {
    script: Mutex<VecDeque<Status>>,
}

impl ScriptedProber {
    pub fn new(statuses: impl IntoIterator<Item = Status>) -> Self {
        Self {
            script: Mutex::new(statuses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _config: &ServiceConfiguration) -> HealthCheckRecord {
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Status::Healthy);
        let now = Utc::now();
        match next {
            Status::Healthy => HealthCheckRecord::healthy(now, Duration::from_millis(20)),
            _ => HealthCheckRecord::critical(now, Duration::from_millis(20), "scripted failure"),
        }
    }
}

/// Actor system over `store` with the default HTTP prober and `db` probes scripted
pub fn system_with(store: Arc<dyn StateStore>, db_prober: ScriptedProber, settings: ActorSettings) -> ActorSystem {
    let mut probes = ProbeRegistry::with_defaults();
    probes.register(ServiceType::Db, Arc::new(db_prober));
    ActorSystem::new(store, probes, TrendsConfig::default(), settings)
}

pub fn memory_system() -> (ActorSystem, Arc<MemoryBackend>) {
    let store = Arc::new(MemoryBackend::new());
    let system = system_with(store.clone(), ScriptedProber::default(), test_settings());
    (system, store)
}

pub fn http_service(id: &str, target: &str) -> ServiceConfiguration {
    let mut config = ServiceConfiguration::new(id, format!("Service {id}"), target);
    config.timeout_seconds = 2;
    config
}

pub fn db_service(id: &str) -> ServiceConfiguration {
    let mut config = ServiceConfiguration::new(id, format!("Database {id}"), "postgres://localhost/test");
    config.service_type = ServiceType::Db;
    config
}

/// One record per minute ending at `end`, healthy ones first
pub fn minute_records(healthy: usize, critical: usize, end: DateTime<Utc>) -> Vec<HealthCheckRecord> {
    let total = healthy + critical;
    (0..total)
        .map(|i| {
            let timestamp = end - chrono::Duration::minutes((total - 1 - i) as i64);
            if i < healthy {
                HealthCheckRecord::healthy(timestamp, Duration::from_millis(100))
            } else {
                HealthCheckRecord::critical(timestamp, Duration::from_millis(100), "HTTP request failed")
            }
        })
        .collect()
}

/// Persist a registered monitor with `records` so the next activation picks it up
pub async fn seed_monitor(store: &dyn StateStore, config: ServiceConfiguration, records: Vec<HealthCheckRecord>) {
    let key = EntityKey::service_monitor(config.id.clone());
    let state = MonitorState {
        configuration: config,
        last_updated: records.last().map(|r| r.timestamp),
        records,
    };
    let row = StateRow::encode(key, &state, Utc::now()).unwrap();
    store.save_state(row).await.unwrap();
}
