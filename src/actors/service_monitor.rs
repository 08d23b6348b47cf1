//! ServiceMonitor - probe executor and record store for one service
//!
//! ## Message Flow
//!
//! ```text
//! health-check reminder → Probe → append record → persist → HealthCheckEvent
//!                                                              ↓
//!                                                      [broadcast subscribers]
//! TrendActor → GetRecords / GetStatistics / CleanupOldRecords
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::analysis::score::{availability_percentage, average_response_time};
use crate::config::ServiceConfiguration;
use crate::model::{HealthCheckRecord, HealthDataStatistics};
use crate::scheduler::{HEALTH_CHECK_REMINDER, Scheduler};
use crate::storage::{EntityKey, ReminderRow, StateRow};

use super::directory::{ActorHandle, Activation};
use super::messages::{HealthCheckEvent, MonitorCommand};
use super::system::ActorSystem;
use super::{ActorError, request, window_start};

/// Record count that triggers the overflow sweep
pub const MAX_RECORDS: usize = 129_600;

/// Age of records kept by the overflow sweep
const OVERFLOW_RETENTION_DAYS: i64 = 30;

/// Longest deferral when the configured flush interval overflows `Instant`
const FLUSH_INTERVAL_CAP: Duration = Duration::from_secs(365 * 24 * 3600);

/// Durable state of one ServiceMonitor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorState {
    /// Empty id until the service is registered
    pub configuration: ServiceConfiguration,

    /// Ordered by timestamp
    pub records: Vec<HealthCheckRecord>,

    pub last_updated: Option<DateTime<Utc>>,
}

impl MonitorState {
    pub fn is_registered(&self) -> bool {
        !self.configuration.id.is_empty()
    }

    /// Insert `record` in timestamp order and enforce the record cap
    pub fn append(&mut self, record: HealthCheckRecord, now: DateTime<Utc>) {
        let position = self
            .records
            .partition_point(|r| r.timestamp <= record.timestamp);
        self.records.insert(position, record);
        self.last_updated = Some(now);

        if self.records.len() > MAX_RECORDS {
            let cutoff = now - chrono::Duration::days(OVERFLOW_RETENTION_DAYS);
            let before = self.records.len();
            self.records.retain(|r| r.timestamp >= cutoff);
            debug!(removed = before - self.records.len(), "record cap exceeded, dropped old records");
        }
    }

    /// Records with `from <= timestamp <= to`
    pub fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> &[HealthCheckRecord] {
        let start = self.records.partition_point(|r| r.timestamp < from);
        let end = self.records.partition_point(|r| r.timestamp <= to);
        self.records.get(start..end).unwrap_or(&[])
    }

    pub fn statistics(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> HealthDataStatistics {
        let matching: Vec<&HealthCheckRecord> = self.range(from, to).iter().collect();
        let (Some(first), Some(last)) = (matching.first(), matching.last()) else {
            return HealthDataStatistics::default();
        };

        let positive = matching
            .iter()
            .map(|r| r.response_time)
            .filter(|t| !t.is_zero());

        HealthDataStatistics {
            total_records: matching.len(),
            availability_percentage: availability_percentage(&matching),
            average_response_time: average_response_time(&matching),
            max_response_time: positive.clone().max().unwrap_or(Duration::ZERO),
            min_response_time: positive.min().unwrap_or(Duration::ZERO),
            failure_count: matching.iter().filter(|r| !r.status.is_healthy()).count(),
            first_record: Some(first.timestamp),
            last_record: Some(last.timestamp),
        }
    }

    /// Drop records at or before `cutoff`, returning how many were removed
    pub fn cleanup(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.timestamp > cutoff);
        before - self.records.len()
    }
}

pub struct ServiceMonitorActor {
    key: EntityKey,
    state: MonitorState,
    system: ActorSystem,
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Records appended since the last write
    dirty: bool,
    last_flush: Option<Instant>,
}

impl ServiceMonitorActor {
    fn new(id: &str, system: ActorSystem, command_rx: mpsc::Receiver<MonitorCommand>) -> Self {
        Self {
            key: EntityKey::service_monitor(id),
            state: MonitorState::default(),
            system,
            command_rx,
            dirty: false,
            last_flush: None,
        }
    }

    /// Load state, then serve commands until shutdown or idle timeout
    #[instrument(skip(self), fields(service = %self.key.id))]
    pub async fn run(mut self) {
        if let Err(e) = self.activate().await {
            error!("failed to load monitor state: {:#}", e);
        }

        let idle_timeout = self.system.settings().idle_timeout;
        loop {
            let flush_at = self.flush_deadline();
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(MonitorCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = tokio::time::sleep_until(flush_at), if self.dirty => {
                    if let Err(e) = self.persist().await {
                        error!("deferred flush failed: {:#}", e);
                    }
                }
                _ = tokio::time::sleep(idle_timeout) => {
                    debug!("idle, deactivating");
                    break;
                }
            }
        }

        // answer whatever was queued before the mailbox closed
        self.command_rx.close();
        while let Some(command) = self.command_rx.recv().await {
            if !matches!(command, MonitorCommand::Shutdown) {
                self.handle(command).await;
            }
        }

        if self.dirty {
            if let Err(e) = self.persist().await {
                error!("final flush failed: {:#}", e);
            }
        }

        debug!("service monitor stopped");
    }

    async fn activate(&mut self) -> Result<()> {
        let row = self
            .system
            .store()
            .load_state(&self.key)
            .await
            .context("failed to load state")?;

        if let Some(row) = row {
            self.state = row.decode()?;
            trace!(records = self.state.records.len(), "monitor state restored");
        }
        Ok(())
    }

    async fn persist(&mut self) -> Result<()> {
        let row = StateRow::encode(self.key.clone(), &self.state, Utc::now())?;
        self.system
            .store()
            .save_state(row)
            .await
            .context("failed to persist monitor state")?;
        self.dirty = false;
        self.last_flush = Some(Instant::now());
        Ok(())
    }

    fn flush_deadline(&self) -> Instant {
        let interval = self.system.settings().state_flush_interval;
        self.last_flush.map_or_else(Instant::now, |at| {
            at.checked_add(interval).unwrap_or(at + FLUSH_INTERVAL_CAP)
        })
    }

    /// Write now unless the last write is more recent than the flush interval
    async fn persist_appended(&mut self) -> Result<()> {
        self.dirty = true;
        if self.flush_deadline() > Instant::now() {
            trace!("state write deferred");
            return Ok(());
        }
        self.persist().await
    }

    async fn handle(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Register { config, respond_to } => {
                let _ = respond_to.send(self.register(config).await);
            }
            MonitorCommand::Probe { respond_to } => {
                let _ = respond_to.send(self.probe().await);
            }
            MonitorCommand::GetRecords {
                from,
                to,
                respond_to,
            } => {
                let _ = respond_to.send(self.state.range(from, to).to_vec());
            }
            MonitorCommand::GetStatistics {
                from,
                to,
                respond_to,
            } => {
                let _ = respond_to.send(self.state.statistics(from, to));
            }
            MonitorCommand::CleanupOldRecords { cutoff, respond_to } => {
                let _ = respond_to.send(self.cleanup_old_records(cutoff).await);
            }
            MonitorCommand::GetLastRecord { respond_to } => {
                let _ = respond_to.send(self.state.records.last().cloned());
            }
            MonitorCommand::GetRecordCount { respond_to } => {
                let _ = respond_to.send(self.state.records.len());
            }
            MonitorCommand::GetConfiguration { respond_to } => {
                let config = self
                    .state
                    .is_registered()
                    .then(|| self.state.configuration.clone());
                let _ = respond_to.send(config);
            }
            MonitorCommand::Shutdown => {}
        }
    }

    #[instrument(skip(self, config), fields(service = %self.key.id))]
    async fn register(&mut self, config: ServiceConfiguration) -> Result<()> {
        if config.id != self.key.id {
            bail!(
                "configuration id {} does not match monitor {}",
                config.id,
                self.key.id
            );
        }

        let period = config.interval();
        self.state.configuration = config;
        self.persist().await?;

        self.system
            .scheduler()
            .register_or_update(ReminderRow {
                key: self.key.clone(),
                name: HEALTH_CHECK_REMINDER.to_string(),
                due_at: Utc::now(),
                period,
            })
            .await?;

        debug!(?period, "service registered");
        Ok(())
    }

    #[instrument(skip(self), fields(service = %self.key.id))]
    async fn probe(&mut self) -> Result<HealthCheckRecord> {
        if !self.state.is_registered() {
            return Err(ActorError::NotRegistered(self.key.id.clone()).into());
        }

        let record = self.system.probes().probe(&self.state.configuration).await;
        trace!(status = ?record.status, response_time = ?record.response_time, "probe finished");

        self.state.append(record.clone(), Utc::now());
        self.persist_appended().await?;

        let event = HealthCheckEvent {
            service_id: self.key.id.clone(),
            record: record.clone(),
        };
        if self.system.event_sender().send(event).is_err() {
            trace!("no subscribers for health check events");
        }

        Ok(record)
    }

    async fn cleanup_old_records(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.state.cleanup(cutoff);
        if removed > 0 {
            debug!(removed, %cutoff, "removed old records");
            self.persist().await?;
        }
        Ok(removed)
    }
}

/// Handle for talking to a ServiceMonitor
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    service_id: String,
    stopped: CancellationToken,
}

impl ActorHandle for MonitorHandle {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    fn stopped(&self) -> &CancellationToken {
        &self.stopped
    }
}

impl MonitorHandle {
    /// Spawn the actor for `service_id`; use [`ActorSystem::monitor`] instead
    ///
    /// The actor starts once the activation it replaces has stopped.
    pub(crate) fn spawn(
        service_id: &str,
        system: ActorSystem,
        previous: Option<CancellationToken>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(system.settings().mailbox_size);
        let actor = ServiceMonitorActor::new(service_id, system, cmd_rx);
        let activation = Activation::new(previous);
        let stopped = activation.stopped();

        tokio::spawn(activation.run(actor.run()));

        Self {
            sender: cmd_tx,
            service_id: service_id.to_string(),
            stopped,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    fn label(&self) -> String {
        format!("service monitor {}", self.service_id)
    }

    /// Store the configuration and arm the health-check reminder
    pub async fn register(&self, config: ServiceConfiguration) -> Result<()> {
        request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::Register { config, respond_to }
        })
        .await?
    }

    /// Probe now; the record is stored and broadcast before returning
    pub async fn probe(&self) -> Result<HealthCheckRecord> {
        request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::Probe { respond_to }
        })
        .await?
    }

    pub async fn get_records(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HealthCheckRecord>> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::GetRecords {
                from,
                to,
                respond_to,
            }
        })
        .await?)
    }

    /// Records from the last `span`
    pub async fn get_recent_records(&self, span: Duration) -> Result<Vec<HealthCheckRecord>> {
        let now = Utc::now();
        self.get_records(window_start(now, span), now).await
    }

    pub async fn get_statistics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HealthDataStatistics> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::GetStatistics {
                from,
                to,
                respond_to,
            }
        })
        .await?)
    }

    /// Keep only records newer than `cutoff`
    pub async fn cleanup_old_records(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::CleanupOldRecords { cutoff, respond_to }
        })
        .await?
    }

    pub async fn get_last_record(&self) -> Result<Option<HealthCheckRecord>> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::GetLastRecord { respond_to }
        })
        .await?)
    }

    pub async fn get_record_count(&self) -> Result<usize> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::GetRecordCount { respond_to }
        })
        .await?)
    }

    /// `None` until the service is registered
    pub async fn get_configuration(&self) -> Result<Option<ServiceConfiguration>> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            MonitorCommand::GetConfiguration { respond_to }
        })
        .await?)
    }

    pub async fn shutdown(&self) {
        if self.sender.send(MonitorCommand::Shutdown).await.is_err() {
            warn!(service = %self.service_id, "monitor already stopped");
        }
    }
}
