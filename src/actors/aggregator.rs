//! AggregatorActor - system-wide view over every registered service
//!
//! The aggregator owns the registry of service ids and answers overview and
//! comparison queries by fanning out to the per-service trend actors. Fan-outs
//! run on spawned tasks so the mailbox keeps serving while they are in
//! flight; results that change the aggregator's own state (a fresh overview,
//! a finished refresh) come back through the mailbox as internal commands.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{ServiceConfiguration, TrendsConfig};
use crate::model::{
    AlertSeverity, AnomalyType, HealthTrendComparisonReport, HealthTrendData,
    HealthTrendDirection, ServiceTrendComparison, SystemHealthAlert, SystemHealthOverview,
    SystemHealthRanking,
};
use crate::scheduler::{AGGREGATOR_REFRESH_REMINDER, Scheduler};
use crate::storage::{EntityKey, ReminderRow, StateRow};

use super::directory::{ActorHandle, Activation};
use super::fanout::bounded_fan_out;
use super::messages::AggregatorCommand;
use super::request;
use super::system::ActorSystem;

/// Key of the singleton aggregator
pub const AGGREGATOR_ID: &str = "system";

const TREND_COLLECTION_LIMIT: usize = 5;
const COMPARISON_LIMIT: usize = 3;
const REFRESH_LIMIT: usize = 3;

/// Latest snapshots older than this are recomputed
const COLLECTION_MAX_AGE_MINUTES: i64 = 10;
const COMPARISON_MAX_AGE_MINUTES: i64 = 5;

const OVERVIEW_WINDOW: Duration = Duration::from_secs(24 * 3600);
const INITIAL_REFRESH_DELAY_SECONDS: i64 = 30;

const HEALTHY_SCORE: f64 = 95.0;
const PROBLEMATIC_SCORE: f64 = 80.0;
const CRITICAL_SCORE: f64 = 70.0;
const WARNING_SCORE: f64 = 90.0;
const SEVERE_ANOMALY: f64 = 0.7;
const HEALTHIEST_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOptions {
    /// Period of the aggregator-refresh reminder
    pub calculation_interval: Duration,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            calculation_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl From<&TrendsConfig> for AggregatorOptions {
    fn from(config: &TrendsConfig) -> Self {
        Self {
            calculation_interval: config.calculation_interval(),
        }
    }
}

/// Durable state of the aggregator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorState {
    /// Empty until the first activation
    pub id: String,
    pub services: BTreeSet<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub cached_overview: Option<SystemHealthOverview>,
    pub overview_expires_at: Option<DateTime<Utc>>,

    /// Bumped whenever the cached overview is invalidated
    #[serde(default)]
    pub overview_generation: u64,
}

impl AggregatorState {
    fn fresh_overview(&self, now: DateTime<Utc>) -> Option<&SystemHealthOverview> {
        match self.overview_expires_at {
            Some(expires_at) if now < expires_at => self.cached_overview.as_ref(),
            _ => None,
        }
    }

    fn invalidate_overview(&mut self) {
        self.cached_overview = None;
        self.overview_expires_at = None;
        self.overview_generation += 1;
    }

    /// Cache `overview` unless an invalidation happened after its fan-out started
    fn store_overview(
        &mut self,
        overview: SystemHealthOverview,
        generation: u64,
        ttl: chrono::Duration,
    ) -> bool {
        if generation != self.overview_generation {
            return false;
        }
        self.overview_expires_at = Some(overview.generated_at + ttl);
        self.cached_overview = Some(overview);
        true
    }
}

pub struct AggregatorActor {
    key: EntityKey,
    state: AggregatorState,
    system: ActorSystem,
    command_rx: mpsc::Receiver<AggregatorCommand>,
    /// Lets fan-out tasks report back without keeping the mailbox open
    self_tx: mpsc::WeakSender<AggregatorCommand>,
    cancel: CancellationToken,
}

impl AggregatorActor {
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        if let Err(e) = self.activate().await {
            error!("failed to activate aggregator: {:#}", e);
        }

        let idle_timeout = self.system.settings().idle_timeout;
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(AggregatorCommand::Shutdown) | None => break,
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
            if !matches!(command, AggregatorCommand::Shutdown) {
                self.handle(command).await;
            }
        }
        self.cancel.cancel();

        debug!("aggregator stopped");
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

        if self.state.id.is_empty() {
            debug!("first activation");
            self.state.id = self.key.id.clone();
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let row = StateRow::encode(self.key.clone(), &self.state, Utc::now())?;
        self.system
            .store()
            .save_state(row)
            .await
            .context("failed to persist aggregator state")
    }

    async fn handle(&mut self, command: AggregatorCommand) {
        match command {
            AggregatorCommand::Initialize {
                options,
                respond_to,
            } => {
                let _ = respond_to.send(self.initialize(options).await);
            }
            AggregatorCommand::RegisterService { config, respond_to } => {
                let _ = respond_to.send(self.register_service(config).await);
            }
            AggregatorCommand::ListServices { respond_to } => {
                let _ = respond_to.send(self.state.services.clone());
            }
            AggregatorCommand::GetAllServiceTrends { window, respond_to } => {
                let ids = self.service_ids();
                let system = self.system.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    let trends = collect_trends(&system, ids, window, &cancel).await;
                    let _ = respond_to.send(trends);
                });
            }
            AggregatorCommand::CompareServiceTrends {
                service_ids,
                window,
                respond_to,
            } => self.compare_service_trends(service_ids, window, respond_to),
            AggregatorCommand::GetSystemOverview { respond_to } => {
                self.get_system_overview(respond_to);
            }
            AggregatorCommand::RefreshAllTrends { respond_to } => {
                self.refresh_all_trends(respond_to).await;
            }
            AggregatorCommand::StoreOverview {
                overview,
                generation,
            } => {
                let ttl = chrono::Duration::from_std(self.system.settings().overview_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(2));
                if !self.state.store_overview(overview, generation, ttl) {
                    debug!(generation, "discarding overview computed before a refresh");
                    return;
                }
                if let Err(e) = self.persist().await {
                    error!("{:#}", e);
                }
            }
            AggregatorCommand::RefreshCompleted { at } => {
                self.state.last_refresh = Some(at);
                if let Err(e) = self.persist().await {
                    error!("{:#}", e);
                }
            }
            AggregatorCommand::Shutdown => {}
        }
    }

    fn service_ids(&self) -> Vec<String> {
        self.state.services.iter().cloned().collect()
    }

    #[instrument(skip(self))]
    async fn initialize(&mut self, options: AggregatorOptions) -> Result<()> {
        self.system
            .scheduler()
            .register_or_update(ReminderRow {
                key: self.key.clone(),
                name: AGGREGATOR_REFRESH_REMINDER.to_string(),
                due_at: Utc::now() + chrono::Duration::seconds(INITIAL_REFRESH_DELAY_SECONDS),
                period: options.calculation_interval,
            })
            .await?;

        info!(
            services = self.state.services.len(),
            interval = ?options.calculation_interval,
            "aggregator initialized"
        );
        Ok(())
    }

    #[instrument(skip(self, config), fields(service = %config.id))]
    async fn register_service(&mut self, config: ServiceConfiguration) -> Result<()> {
        let id = config.id.clone();
        if self.state.services.insert(id.clone()) {
            self.persist().await?;
        }

        self.system
            .monitor(&id)
            .register(config)
            .await
            .with_context(|| format!("failed to register monitor for {id}"))
    }

    fn compare_service_trends(
        &self,
        service_ids: Vec<String>,
        window: Duration,
        respond_to: oneshot::Sender<HealthTrendComparisonReport>,
    ) {
        let known: Vec<String> = service_ids
            .into_iter()
            .filter(|id| self.state.services.contains(id))
            .collect();

        if known.is_empty() {
            trace!("no registered services to compare");
            let _ = respond_to.send(HealthTrendComparisonReport::empty(window, Utc::now()));
            return;
        }

        let system = self.system.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let max_age = chrono::Duration::minutes(COMPARISON_MAX_AGE_MINUTES);
            let results = bounded_fan_out(known, COMPARISON_LIMIT, &cancel, |id| {
                let system = system.clone();
                async move { latest_or_recalculate(&system, &id, window, max_age).await }
            })
            .await;

            let trends = successful(results, "compare trend");
            let _ = respond_to.send(build_comparison(trends, window, Utc::now()));
        });
    }

    fn get_system_overview(&self, respond_to: oneshot::Sender<SystemHealthOverview>) {
        let now = Utc::now();
        if let Some(overview) = self.state.fresh_overview(now) {
            trace!("serving cached overview");
            let _ = respond_to.send(overview.clone());
            return;
        }

        let ids = self.service_ids();
        let total = ids.len();
        let system = self.system.clone();
        let cancel = self.cancel.child_token();
        let self_tx = self.self_tx.clone();
        let generation = self.state.overview_generation;

        tokio::spawn(async move {
            let trends = collect_trends(&system, ids, OVERVIEW_WINDOW, &cancel).await;
            let now = Utc::now();
            if trends.is_empty() {
                let _ = respond_to.send(SystemHealthOverview::empty(total, now));
                return;
            }

            let overview = build_overview(&trends, total, now);
            if let Some(tx) = self_tx.upgrade() {
                let store = AggregatorCommand::StoreOverview {
                    overview: overview.clone(),
                    generation,
                };
                if tx.send(store).await.is_err() {
                    debug!("aggregator stopped before caching the overview");
                }
            }
            let _ = respond_to.send(overview);
        });
    }

    #[instrument(skip(self, respond_to))]
    async fn refresh_all_trends(&mut self, respond_to: oneshot::Sender<Result<()>>) {
        self.state.invalidate_overview();
        if let Err(e) = self.persist().await {
            let _ = respond_to.send(Err(e));
            return;
        }

        let ids = self.service_ids();
        let system = self.system.clone();
        let cancel = self.cancel.child_token();
        let self_tx = self.self_tx.clone();
        let retention = self.system.trends_config().retention_period();

        tokio::spawn(async move {
            let count = ids.len();
            let results = bounded_fan_out(ids, REFRESH_LIMIT, &cancel, |id| {
                let system = system.clone();
                async move {
                    system.trend(&id).refresh_trend_data().await?;
                    let cutoff = Utc::now()
                        .checked_sub_signed(retention)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let removed = system.monitor(&id).cleanup_old_records(cutoff).await?;
                    trace!(service = %id, removed, "retention applied");
                    Ok::<(), anyhow::Error>(())
                }
            })
            .await;

            let refreshed = successful(results, "refresh trend").len();
            info!(refreshed, total = count, "refreshed trend data");

            if let Some(tx) = self_tx.upgrade() {
                let _ = tx.send(AggregatorCommand::RefreshCompleted { at: Utc::now() }).await;
            }
            let _ = respond_to.send(Ok(()));
        });
    }
}

/// Latest snapshot of every id, recomputed when stale
async fn collect_trends(
    system: &ActorSystem,
    ids: Vec<String>,
    window: Duration,
    cancel: &CancellationToken,
) -> Vec<HealthTrendData> {
    let max_age = chrono::Duration::minutes(COLLECTION_MAX_AGE_MINUTES);
    let results = bounded_fan_out(ids, TREND_COLLECTION_LIMIT, cancel, |id| {
        let system = system.clone();
        async move { latest_or_recalculate(&system, &id, window, max_age).await }
    })
    .await;

    successful(results, "collect trend")
}

async fn latest_or_recalculate(
    system: &ActorSystem,
    id: &str,
    window: Duration,
    max_age: chrono::Duration,
) -> Result<HealthTrendData> {
    let trend = system.trend(id);
    let latest = trend.get_latest_trend().await?;

    let stale = Utc::now() - latest.calculated_at > max_age
        || latest.time_window != window
        || latest.total_data_points == 0;
    if stale {
        trend.calculate_trend(window).await
    } else {
        Ok(latest)
    }
}

/// Drop failed sub-calls after logging them
fn successful<T>(results: Vec<(String, Result<T>)>, what: &str) -> Vec<T> {
    results
        .into_iter()
        .filter_map(|(id, result)| match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(service = %id, "failed to {}: {:#}", what, e);
                None
            }
        })
        .collect()
}

pub fn build_overview(
    trends: &[HealthTrendData],
    total_services: usize,
    now: DateTime<Utc>,
) -> SystemHealthOverview {
    let scores: Vec<f64> = trends.iter().map(|t| t.overall_health_score).collect();
    let overall_system_health = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let mut services_by_trend = BTreeMap::new();
    for trend in trends {
        *services_by_trend.entry(trend.health_trend).or_insert(0) += 1;
    }

    let mut alerts: Vec<SystemHealthAlert> = trends.iter().flat_map(|t| alerts_for(t, now)).collect();
    alerts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.detected_at.cmp(&a.detected_at))
    });

    SystemHealthOverview {
        generated_at: now,
        total_services,
        healthy_services: scores.iter().filter(|s| **s >= HEALTHY_SCORE).count(),
        problematic_services: scores.iter().filter(|s| **s < PROBLEMATIC_SCORE).count(),
        overall_system_health,
        alerts,
        services_by_trend,
    }
}

fn alerts_for(trend: &HealthTrendData, now: DateTime<Utc>) -> Vec<SystemHealthAlert> {
    let mut alerts = Vec::new();
    let score = trend.overall_health_score;

    if score < CRITICAL_SCORE {
        alerts.push(SystemHealthAlert {
            service_id: trend.service_id.clone(),
            severity: AlertSeverity::Critical,
            message: format!("Service health critically low: {score:.1}%"),
            detected_at: now,
        });
    } else if score < WARNING_SCORE && trend.health_trend == HealthTrendDirection::Declining {
        alerts.push(SystemHealthAlert {
            service_id: trend.service_id.clone(),
            severity: AlertSeverity::Warning,
            message: format!("Service health declining: {score:.1}%"),
            detected_at: now,
        });
    }

    alerts.extend(
        trend
            .detected_anomalies
            .iter()
            .filter(|a| a.severity > SEVERE_ANOMALY)
            .map(|anomaly| SystemHealthAlert {
                service_id: trend.service_id.clone(),
                severity: if anomaly.anomaly_type == AnomalyType::LongOutage {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                message: anomaly.description.clone(),
                detected_at: anomaly.start_time,
            }),
    );

    alerts
}

pub fn build_comparison(
    mut trends: Vec<HealthTrendData>,
    window: Duration,
    now: DateTime<Utc>,
) -> HealthTrendComparisonReport {
    trends.sort_by(|a, b| b.overall_health_score.total_cmp(&a.overall_health_score));

    let health_ranking = SystemHealthRanking {
        healthiest_services: trends
            .iter()
            .take(HEALTHIEST_COUNT)
            .map(|t| t.service_id.clone())
            .collect(),
        problematic_services: ids_matching(&trends, |t| t.overall_health_score < PROBLEMATIC_SCORE),
        improving_services: ids_matching(&trends, |t| t.health_trend == HealthTrendDirection::Improving),
        declining_services: ids_matching(&trends, |t| t.health_trend == HealthTrendDirection::Declining),
    };

    let service_comparisons = trends
        .into_iter()
        .enumerate()
        .map(|(index, trend)| ServiceTrendComparison {
            service_id: trend.service_id.clone(),
            health_rank: index + 1,
            relative_health_score: trend.overall_health_score,
            health_insights: health_insights(&trend),
            trend_data: trend,
        })
        .collect();

    HealthTrendComparisonReport {
        generated_at: now,
        analysis_window: window,
        service_comparisons,
        health_ranking,
    }
}

fn ids_matching(
    trends: &[HealthTrendData],
    predicate: impl Fn(&HealthTrendData) -> bool,
) -> Vec<String> {
    trends
        .iter()
        .filter(|t| predicate(t))
        .map(|t| t.service_id.clone())
        .collect()
}

pub fn health_insights(trend: &HealthTrendData) -> Vec<String> {
    let mut insights = Vec::new();

    if trend.availability_percentage < 99.0 {
        insights.push(format!(
            "Availability below 99% ({:.2}%)",
            trend.availability_percentage
        ));
    }

    let response_secs = trend.average_response_time.as_secs_f64();
    if response_secs > 2.0 {
        insights.push(format!("High average response time ({response_secs:.1}s)"));
    }

    let outages = trend
        .detected_anomalies
        .iter()
        .filter(|a| a.anomaly_type == AnomalyType::LongOutage)
        .count();
    if outages > 0 {
        insights.push(format!("{outages} service outages detected"));
    }

    match trend.health_trend {
        HealthTrendDirection::Improving => insights.push("Health trend is improving".to_string()),
        HealthTrendDirection::Declining => {
            insights.push("Health trend is declining - needs attention".to_string())
        }
        _ => {}
    }

    if !trend.sla_metrics.meeting_availability_sla {
        insights.push("Not meeting availability SLA".to_string());
    }
    if !trend.sla_metrics.meeting_response_time_sla {
        insights.push("Not meeting response time SLA".to_string());
    }

    insights
}

/// Handle for talking to the AggregatorActor
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorCommand>,
    stopped: CancellationToken,
}

impl ActorHandle for AggregatorHandle {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    fn stopped(&self) -> &CancellationToken {
        &self.stopped
    }
}

const LABEL: &str = "aggregator";

impl AggregatorHandle {
    pub(crate) fn spawn(system: ActorSystem, previous: Option<CancellationToken>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(system.settings().mailbox_size);
        let actor = AggregatorActor {
            key: EntityKey::aggregator(AGGREGATOR_ID),
            state: AggregatorState::default(),
            cancel: system.shutdown_token().child_token(),
            system,
            command_rx: cmd_rx,
            self_tx: cmd_tx.downgrade(),
        };

        let activation = Activation::new(previous);
        let stopped = activation.stopped();

        tokio::spawn(activation.run(actor.run()));

        Self {
            sender: cmd_tx,
            stopped,
        }
    }

    /// Arm the periodic system refresh
    pub async fn initialize(&self, options: AggregatorOptions) -> Result<()> {
        request(&self.sender, LABEL, |respond_to| AggregatorCommand::Initialize {
            options,
            respond_to,
        })
        .await?
    }

    /// Add the service to the registry and register its monitor
    pub async fn register_service(&self, config: ServiceConfiguration) -> Result<()> {
        request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::RegisterService { config, respond_to }
        })
        .await?
    }

    pub async fn list_services(&self) -> Result<BTreeSet<String>> {
        Ok(request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::ListServices { respond_to }
        })
        .await?)
    }

    pub async fn get_all_service_trends(&self, window: Duration) -> Result<Vec<HealthTrendData>> {
        Ok(request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::GetAllServiceTrends { window, respond_to }
        })
        .await?)
    }

    pub async fn compare_service_trends(
        &self,
        service_ids: Vec<String>,
        window: Duration,
    ) -> Result<HealthTrendComparisonReport> {
        Ok(request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::CompareServiceTrends {
                service_ids,
                window,
                respond_to,
            }
        })
        .await?)
    }

    pub async fn get_system_overview(&self) -> Result<SystemHealthOverview> {
        Ok(request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::GetSystemOverview { respond_to }
        })
        .await?)
    }

    pub async fn refresh_all_trends(&self) -> Result<()> {
        request(&self.sender, LABEL, |respond_to| {
            AggregatorCommand::RefreshAllTrends { respond_to }
        })
        .await?
    }

    pub async fn shutdown(&self) {
        if self.sender.send(AggregatorCommand::Shutdown).await.is_err() {
            warn!("aggregator already stopped");
        }
    }
}
