//! TrendActor - cached trend computation for one service
//!
//! Pulls records from the service's monitor, runs the [`TrendEngine`] and
//! keeps a short-lived per-window cache plus a bounded history of snapshots.
//! The history feeds back into the engine, which derives direction and
//! forecasts from it once enough snapshots exist.
//!
//! [`TrendEngine`]: crate::analysis::TrendEngine

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::model::{HealthCheckRecord, HealthTrendData};
use crate::scheduler::{Scheduler, TREND_REFRESH_REMINDER};
use crate::storage::{EntityKey, ReminderRow, StateRow};

use super::directory::{ActorHandle, Activation};
use super::messages::TrendCommand;
use super::system::ActorSystem;
use super::{request, retry_with_backoff, window_start};

/// Snapshots kept in history
pub const MAX_HISTORY: usize = 200;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(24 * 3600);

/// Windows recomputed by a refresh
pub const REFRESH_WINDOWS: [Duration; 4] = [
    HOUR,
    DAY,
    Duration::from_secs(7 * 24 * 3600),
    Duration::from_secs(30 * 24 * 3600),
];

/// Windows shorter than this fall back to the last day when empty
const FALLBACK_LIMIT: Duration = Duration::from_secs(7 * 24 * 3600);

const REFRESH_DELAY: Duration = Duration::from_secs(10 * 60);
const REFRESH_PERIOD: Duration = Duration::from_secs(10 * 60);

/// A new snapshot is appended to history when any of these hold
const HISTORY_MIN_SPACING_MINUTES: i64 = 30;
const HISTORY_SCORE_DELTA: f64 = 5.0;

/// Cache entries older than this are pruned
const CACHE_MAX_AGE_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTrend {
    pub window: Duration,
    pub trend: HealthTrendData,
    pub cached_at: DateTime<Utc>,
}

/// Durable state of one TrendActor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendState {
    /// Empty until the first activation
    pub service_id: String,

    /// Ordered by calculation time
    pub history: Vec<HealthTrendData>,

    pub cache: Vec<CachedTrend>,
    pub last_calculated: Option<DateTime<Utc>>,
}

impl TrendState {
    /// Cached snapshot for `window` while younger than `ttl`
    pub fn cached(&self, window: Duration, now: DateTime<Utc>, ttl: Duration) -> Option<&HealthTrendData> {
        self.cache
            .iter()
            .find(|c| c.window == window && (now - c.cached_at).to_std().is_ok_and(|age| age < ttl))
            .map(|c| &c.trend)
    }

    pub fn latest(&self) -> Option<&HealthTrendData> {
        self.history.iter().max_by_key(|t| t.calculated_at)
    }

    /// Most recent `count` snapshots, newest first
    pub fn recent(&self, count: usize) -> Vec<HealthTrendData> {
        let mut history = self.history.clone();
        history.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at));
        history.truncate(count);
        history
    }

    /// Cache a fresh snapshot and append it to history when it is new enough
    pub fn remember(&mut self, trend: HealthTrendData, now: DateTime<Utc>) {
        if should_append(self.latest(), &trend) {
            self.history.push(trend.clone());
            self.history.sort_by_key(|t| t.calculated_at);
            if self.history.len() > MAX_HISTORY {
                let excess = self.history.len() - MAX_HISTORY;
                self.history.drain(..excess);
            }
        }

        self.cache.retain(|c| c.window != trend.time_window);
        self.cache.push(CachedTrend {
            window: trend.time_window,
            trend,
            cached_at: now,
        });

        let max_age = chrono::Duration::minutes(CACHE_MAX_AGE_MINUTES);
        self.cache.retain(|c| now - c.cached_at <= max_age);
        self.last_calculated = Some(now);
    }
}

fn should_append(last: Option<&HealthTrendData>, trend: &HealthTrendData) -> bool {
    let Some(last) = last else {
        return true;
    };

    trend.calculated_at - last.calculated_at >= chrono::Duration::minutes(HISTORY_MIN_SPACING_MINUTES)
        || (trend.overall_health_score - last.overall_health_score).abs() > HISTORY_SCORE_DELTA
        || trend.time_window != last.time_window
        || trend.health_trend != last.health_trend
}

pub struct TrendActor {
    key: EntityKey,
    state: TrendState,
    system: ActorSystem,
    command_rx: mpsc::Receiver<TrendCommand>,
}

impl TrendActor {
    fn new(id: &str, system: ActorSystem, command_rx: mpsc::Receiver<TrendCommand>) -> Self {
        Self {
            key: EntityKey::trend_actor(id),
            state: TrendState::default(),
            system,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(service = %self.key.id))]
    pub async fn run(mut self) {
        if let Err(e) = self.activate().await {
            error!("failed to activate trend actor: {:#}", e);
        }

        let idle_timeout = self.system.settings().idle_timeout;
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(TrendCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = tokio::time::sleep(idle_timeout) => {
                    debug!("idle, deactivating");
                    break;
                }
            }
        }

        self.command_rx.close();
        while let Some(command) = self.command_rx.recv().await {
            if !matches!(command, TrendCommand::Shutdown) {
                self.handle(command).await;
            }
        }

        debug!("trend actor stopped");
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
        }

        if self.state.service_id.is_empty() {
            debug!("first activation");
            self.state.service_id = self.key.id.clone();
            self.persist().await?;
            self.system
                .scheduler()
                .register_or_update(ReminderRow {
                    key: self.key.clone(),
                    name: TREND_REFRESH_REMINDER.to_string(),
                    due_at: Utc::now() + chrono::Duration::from_std(REFRESH_DELAY)?,
                    period: REFRESH_PERIOD,
                })
                .await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let row = StateRow::encode(self.key.clone(), &self.state, Utc::now())?;
        self.system
            .store()
            .save_state(row)
            .await
            .context("failed to persist trend state")
    }

    async fn handle(&mut self, command: TrendCommand) {
        match command {
            TrendCommand::CalculateTrend { window, respond_to } => {
                let _ = respond_to.send(self.calculate_trend(window).await);
            }
            TrendCommand::GetLatestTrend { respond_to } => {
                let latest = self.state.latest().cloned().unwrap_or_else(|| {
                    HealthTrendData::empty_with_sla(
                        &self.key.id,
                        DAY,
                        Utc::now(),
                        self.system.engine().sla_target(),
                    )
                });
                let _ = respond_to.send(latest);
            }
            TrendCommand::GetTrendHistory { count, respond_to } => {
                let _ = respond_to.send(self.state.recent(count));
            }
            TrendCommand::RefreshTrendData { respond_to } => {
                let _ = respond_to.send(self.refresh_trend_data().await);
            }
            TrendCommand::Shutdown => {}
        }
    }

    fn ttl(&self, window: Duration) -> Duration {
        let settings = self.system.settings();
        if window <= HOUR {
            settings.short_cache_ttl
        } else {
            settings.long_cache_ttl
        }
    }

    fn empty_trend(&self, window: Duration, now: DateTime<Utc>) -> HealthTrendData {
        HealthTrendData::empty_with_sla(&self.key.id, window, now, self.system.engine().sla_target())
    }

    #[instrument(skip(self), fields(service = %self.key.id))]
    async fn calculate_trend(&mut self, window: Duration) -> HealthTrendData {
        let now = Utc::now();
        if let Some(hit) = self.state.cached(window, now, self.ttl(window)) {
            trace!(?window, "cache hit");
            return hit.clone();
        }

        let records = match self.fetch_records(window, now).await {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => {
                debug!(?window, "no records available");
                return self.empty_trend(window, now);
            }
            Err(e) => {
                warn!("failed to fetch records: {:#}", e);
                return self.empty_trend(window, now);
            }
        };

        let trend = self.compute(window, &records, now);
        if let Err(e) = self.persist().await {
            error!("{:#}", e);
        }
        trend
    }

    fn compute(&mut self, window: Duration, records: &[HealthCheckRecord], now: DateTime<Utc>) -> HealthTrendData {
        let trend = self
            .system
            .engine()
            .calculate(&self.key.id, records, window, &self.state.history, now);
        self.state.remember(trend.clone(), now);
        trend
    }

    /// Clear the cache and recompute every standard window
    #[instrument(skip(self), fields(service = %self.key.id))]
    async fn refresh_trend_data(&mut self) -> Result<()> {
        self.state.cache.clear();
        let now = Utc::now();

        let fetched = join_all(REFRESH_WINDOWS.iter().map(|window| self.fetch_records(*window, now))).await;

        let mut computed = 0;
        for (window, records) in REFRESH_WINDOWS.into_iter().zip(fetched) {
            match records {
                Ok(records) if !records.is_empty() => {
                    self.compute(window, &records, now);
                    computed += 1;
                }
                Ok(_) => trace!(?window, "no records to refresh"),
                Err(e) => warn!(?window, "failed to fetch records: {:#}", e),
            }
        }

        self.persist().await?;
        info!(computed, "trend data refreshed");
        Ok(())
    }

    async fn fetch_records(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<HealthCheckRecord>> {
        let base = self.system.settings().retry_base_delay;
        let from = window_start(now, window);

        // the monitor handle is looked up on every attempt so a deactivated
        // monitor is revived
        let records = retry_with_backoff(base, || {
            let monitor = self.system.monitor(&self.key.id);
            async move { monitor.get_records(from, now).await }
        })
        .await?;

        if records.is_empty() && window < FALLBACK_LIMIT {
            trace!(?window, "window empty, falling back to the last day");
            let from = window_start(now, DAY);
            return retry_with_backoff(base, || {
                let monitor = self.system.monitor(&self.key.id);
                async move { monitor.get_records(from, now).await }
            })
            .await;
        }

        Ok(records)
    }
}

/// Handle for talking to a TrendActor
#[derive(Clone)]
pub struct TrendHandle {
    sender: mpsc::Sender<TrendCommand>,
    service_id: String,
    stopped: CancellationToken,
}

impl ActorHandle for TrendHandle {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    fn stopped(&self) -> &CancellationToken {
        &self.stopped
    }
}

impl TrendHandle {
    pub(crate) fn spawn(
        service_id: &str,
        system: ActorSystem,
        previous: Option<CancellationToken>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(system.settings().mailbox_size);
        let actor = TrendActor::new(service_id, system, cmd_rx);
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
        format!("trend actor {}", self.service_id)
    }

    /// Snapshot for the last `window`, served from cache while fresh
    pub async fn calculate_trend(&self, window: Duration) -> Result<HealthTrendData> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            TrendCommand::CalculateTrend { window, respond_to }
        })
        .await?)
    }

    pub async fn get_latest_trend(&self) -> Result<HealthTrendData> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            TrendCommand::GetLatestTrend { respond_to }
        })
        .await?)
    }

    pub async fn get_trend_history(&self, count: usize) -> Result<Vec<HealthTrendData>> {
        Ok(request(&self.sender, &self.label(), |respond_to| {
            TrendCommand::GetTrendHistory { count, respond_to }
        })
        .await?)
    }

    pub async fn refresh_trend_data(&self) -> Result<()> {
        request(&self.sender, &self.label(), |respond_to| {
            TrendCommand::RefreshTrendData { respond_to }
        })
        .await?
    }

    pub async fn shutdown(&self) {
        if self.sender.send(TrendCommand::Shutdown).await.is_err() {
            warn!(service = %self.service_id, "trend actor already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthTrendDirection;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn snapshot(minutes: i64, score: f64) -> HealthTrendData {
        let mut trend = HealthTrendData::empty("api", HOUR, at(minutes));
        trend.overall_health_score = score;
        trend
    }

    #[test]
    fn test_cache_respects_ttl() {
        let mut state = TrendState::default();
        state.remember(snapshot(0, 90.0), at(0));

        let ttl = Duration::from_secs(60);
        assert!(state.cached(HOUR, at(0), ttl).is_some());
        assert!(state.cached(HOUR, at(0) + chrono::Duration::seconds(59), ttl).is_some());
        assert!(state.cached(HOUR, at(1), ttl).is_none());
        assert!(state.cached(DAY, at(0), ttl).is_none());
    }

    #[test]
    fn test_history_append_rules() {
        let mut state = TrendState::default();
        state.remember(snapshot(0, 90.0), at(0));
        // too soon, same score, window and direction
        state.remember(snapshot(5, 92.0), at(5));
        assert_eq!(state.history.len(), 1);

        // score moved by more than five points
        state.remember(snapshot(6, 80.0), at(6));
        assert_eq!(state.history.len(), 2);

        // direction changed
        let mut changed = snapshot(7, 80.0);
        changed.health_trend = HealthTrendDirection::Declining;
        state.remember(changed, at(7));
        assert_eq!(state.history.len(), 3);

        // thirty minutes after the last entry
        let mut later = snapshot(37, 80.0);
        later.health_trend = HealthTrendDirection::Declining;
        state.remember(later, at(37));
        assert_eq!(state.history.len(), 4);

        // a different window
        let mut daily = snapshot(38, 80.0);
        daily.health_trend = HealthTrendDirection::Declining;
        daily.time_window = DAY;
        state.remember(daily, at(38));
        assert_eq!(state.history.len(), 5);
        assert_eq!(state.cache.len(), 2);
    }

    #[test]
    fn test_history_is_capped_by_recency() {
        let mut state = TrendState::default();
        for i in 0..(MAX_HISTORY as i64 + 20) {
            state.remember(snapshot(i * 30, 90.0), at(i * 30));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].calculated_at, at(20 * 30));

        let recent = state.recent(3);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].calculated_at > recent[1].calculated_at);
        assert_eq!(state.latest().map(|t| t.calculated_at), Some(at((MAX_HISTORY as i64 + 19) * 30)));
    }

    #[test]
    fn test_old_cache_entries_are_pruned() {
        let mut state = TrendState::default();
        state.remember(snapshot(0, 90.0), at(0));
        let mut daily = snapshot(90, 90.0);
        daily.time_window = DAY;
        state.remember(daily, at(90));

        assert_eq!(state.cache.len(), 1);
        assert_eq!(state.cache[0].window, DAY);
    }
}
