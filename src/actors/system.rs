//! Actor system: directory, activation and reminder routing
//!
//! [`ActorSystem`] is a cheap `Clone` handle shared by every actor. It owns
//! the state store, the probe registry, the reminder scheduler and the
//! directories of live entities. Looking up an entity that is not running
//! activates it; the actor then rehydrates itself from the store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::analysis::TrendEngine;
use crate::config::TrendsConfig;
use crate::probe::ProbeRegistry;
use crate::scheduler::{
    AGGREGATOR_REFRESH_REMINDER, HEALTH_CHECK_REMINDER, ReminderFired, ReminderScheduler,
    Scheduler, TREND_REFRESH_REMINDER,
};
use crate::storage::{EntityKind, StateStore};

use super::aggregator::{AGGREGATOR_ID, AggregatorHandle};
use super::directory::{ActorHandle, Directory};
use super::messages::HealthCheckEvent;
use super::service_monitor::MonitorHandle;
use super::trend::TrendHandle;

/// Tunables of the actor runtime
#[derive(Debug, Clone)]
pub struct ActorSettings {
    /// Entities with an empty mailbox for this long deactivate
    pub idle_timeout: Duration,

    pub mailbox_size: usize,

    /// First retry delay; doubles on each attempt
    pub retry_base_delay: Duration,

    /// Trend cache TTL for windows up to one hour
    pub short_cache_ttl: Duration,

    /// Trend cache TTL for longer windows
    pub long_cache_ttl: Duration,

    pub overview_ttl: Duration,

    /// Minimum spacing of monitor state writes after probes; zero writes
    /// every probe through. Deferred records are flushed once the interval
    /// has passed and on deactivation
    pub state_flush_interval: Duration,

    /// Capacity of the health check event channel
    pub event_capacity: usize,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            mailbox_size: 32,
            retry_base_delay: Duration::from_millis(100),
            short_cache_ttl: Duration::from_secs(60),
            long_cache_ttl: Duration::from_secs(5 * 60),
            overview_ttl: Duration::from_secs(2 * 60),
            state_flush_interval: Duration::ZERO,
            event_capacity: 256,
        }
    }
}

struct SystemInner {
    store: Arc<dyn StateStore>,
    probes: ProbeRegistry,
    scheduler: ReminderScheduler,
    fired_rx: Mutex<Option<mpsc::Receiver<ReminderFired>>>,
    events: broadcast::Sender<HealthCheckEvent>,
    settings: ActorSettings,
    trends_config: TrendsConfig,
    engine: TrendEngine,
    monitors: Directory<MonitorHandle>,
    trends: Directory<TrendHandle>,
    aggregator: Directory<AggregatorHandle>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

impl ActorSystem {
    pub fn new(
        store: Arc<dyn StateStore>,
        probes: ProbeRegistry,
        trends_config: TrendsConfig,
        settings: ActorSettings,
    ) -> Self {
        let (fired_tx, fired_rx) = mpsc::channel(settings.mailbox_size.max(1) * 4);
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));

        Self {
            inner: Arc::new(SystemInner {
                scheduler: ReminderScheduler::new(store.clone(), fired_tx),
                store,
                probes,
                fired_rx: Mutex::new(Some(fired_rx)),
                events,
                engine: TrendEngine::new(trends_config.sla),
                trends_config,
                settings,
                monitors: Directory::new(),
                trends: Directory::new(),
                aggregator: Directory::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.store
    }

    pub fn probes(&self) -> &ProbeRegistry {
        &self.inner.probes
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.inner.scheduler
    }

    pub fn settings(&self) -> &ActorSettings {
        &self.inner.settings
    }

    pub fn trends_config(&self) -> &TrendsConfig {
        &self.inner.trends_config
    }

    pub fn engine(&self) -> &TrendEngine {
        &self.inner.engine
    }

    pub(crate) fn event_sender(&self) -> &broadcast::Sender<HealthCheckEvent> {
        &self.inner.events
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Receive every new probe record
    pub fn subscribe(&self) -> broadcast::Receiver<HealthCheckEvent> {
        self.inner.events.subscribe()
    }

    pub fn monitor(&self, service_id: &str) -> MonitorHandle {
        self.inner
            .monitors
            .get_or_activate(service_id, |previous| {
                MonitorHandle::spawn(service_id, self.clone(), previous)
            })
    }

    pub fn trend(&self, service_id: &str) -> TrendHandle {
        self.inner
            .trends
            .get_or_activate(service_id, |previous| {
                TrendHandle::spawn(service_id, self.clone(), previous)
            })
    }

    pub fn aggregator(&self) -> AggregatorHandle {
        self.inner
            .aggregator
            .get_or_activate(AGGREGATOR_ID, |previous| {
                AggregatorHandle::spawn(self.clone(), previous)
            })
    }

    /// Number of running monitors and trend actors
    pub fn live_entities(&self) -> (usize, usize) {
        (
            self.inner.monitors.live_count(),
            self.inner.trends.live_count(),
        )
    }

    /// Start routing reminders and re-arm every persisted one
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let fired_rx = self
            .inner
            .fired_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(fired_rx) = fired_rx else {
            bail!("actor system already started");
        };

        tokio::spawn(self.clone().route_reminders(fired_rx));

        let armed = self
            .inner
            .scheduler
            .rearm_all()
            .await
            .context("failed to re-arm reminders")?;
        info!(armed, "actor system started");
        Ok(())
    }

    async fn route_reminders(self, mut fired_rx: mpsc::Receiver<ReminderFired>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                fired = fired_rx.recv() => {
                    let Some(fired) = fired else { break };
                    let system = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = system.dispatch(&fired).await {
                            error!(target_key = %fired.target, reminder = %fired.name, "reminder failed: {:#}", e);
                        }
                    });
                }
            }
        }
        debug!("reminder routing stopped");
    }

    async fn dispatch(&self, fired: &ReminderFired) -> Result<()> {
        let id = fired.target.id.as_str();
        match (fired.target.kind, fired.name.as_str()) {
            (EntityKind::ServiceMonitor, HEALTH_CHECK_REMINDER) => {
                self.monitor(id).probe().await.map(|_| ())
            }
            (EntityKind::TrendActor, TREND_REFRESH_REMINDER) => {
                self.trend(id).refresh_trend_data().await
            }
            (EntityKind::Aggregator, AGGREGATOR_REFRESH_REMINDER) => {
                self.aggregator().refresh_all_trends().await
            }
            (kind, name) => {
                warn!(%kind, name, "unknown reminder, unregistering");
                self.inner.scheduler.unregister(&fired.target, name).await
            }
        }
    }

    /// Stop timers and every live entity, then close the store
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.scheduler.shutdown();

        // monitors flush deferred records on the way out, so wait for every
        // task before closing the store
        let mut stopped = Vec::new();
        for handle in self.inner.monitors.drain() {
            handle.shutdown().await;
            stopped.push(handle.stopped().clone());
        }
        for handle in self.inner.trends.drain() {
            handle.shutdown().await;
            stopped.push(handle.stopped().clone());
        }
        for handle in self.inner.aggregator.drain() {
            handle.shutdown().await;
            stopped.push(handle.stopped().clone());
        }
        for token in stopped {
            token.cancelled().await;
        }

        if let Err(e) = self.inner.store.close().await {
            warn!("failed to close state store: {}", e);
        }
        info!("actor system stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfiguration, ServiceType};
    use crate::model::{HealthCheckRecord, Status};
    use crate::probe::Prober;
    use crate::storage::MemoryBackend;
    use async_trait::async_trait;
    use chrono::Utc;

    struct AlwaysHealthy;

    #[async_trait]
    impl Prober for AlwaysHealthy {
        async fn probe(&self, _config: &ServiceConfiguration) -> HealthCheckRecord {
            HealthCheckRecord::healthy(Utc::now(), Duration::from_millis(5))
        }
    }

    fn test_system() -> ActorSystem {
        let mut probes = ProbeRegistry::empty();
        probes.register(ServiceType::Db, Arc::new(AlwaysHealthy));
        ActorSystem::new(
            Arc::new(MemoryBackend::default()),
            probes,
            TrendsConfig::default(),
            ActorSettings {
                idle_timeout: Duration::from_secs(5),
                retry_base_delay: Duration::from_millis(5),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let system = test_system();
        system.start().await.unwrap();
        assert!(system.start().await.is_err());
        system.shutdown().await;
    }

    #[tokio::test]
    async fn test_lookup_reuses_live_entity() {
        let system = test_system();
        system.monitor("db-1");
        system.monitor("db-1");
        system.trend("db-1");
        assert_eq!(system.live_entities(), (1, 1));
        system.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_check_reminder_triggers_probe() {
        let system = test_system();
        let mut events = system.subscribe();
        system.start().await.unwrap();

        let mut config = ServiceConfiguration::new("db-1", "Primary DB", "postgres://db");
        config.service_type = ServiceType::Db;
        system.monitor("db-1").register(config).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("probe was not triggered")
            .unwrap();
        assert_eq!(event.service_id, "db-1");
        assert_eq!(event.record.status, Status::Healthy);

        system.shutdown().await;
    }
}
