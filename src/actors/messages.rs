//! Message types for actor communication
//!
//! 1. **Commands**: request/response messages sent to one entity via mpsc
//! 2. **Events**: broadcast notifications published to every subscriber

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::ServiceConfiguration;
use crate::model::{
    HealthCheckRecord, HealthDataStatistics, HealthTrendComparisonReport, HealthTrendData,
    SystemHealthOverview,
};

use super::aggregator::AggregatorOptions;

/// Event published after a probe record was stored
///
/// Slow subscribers may lag and miss events; the record itself is durable in
/// the owning ServiceMonitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckEvent {
    pub service_id: String,
    pub record: HealthCheckRecord,
}

/// Commands handled by a ServiceMonitor
#[derive(Debug)]
pub enum MonitorCommand {
    Register {
        config: ServiceConfiguration,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Run the configured probe now and store the result
    Probe {
        respond_to: oneshot::Sender<anyhow::Result<HealthCheckRecord>>,
    },

    /// Records with `from <= timestamp <= to`, oldest first
    GetRecords {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        respond_to: oneshot::Sender<Vec<HealthCheckRecord>>,
    },

    GetStatistics {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        respond_to: oneshot::Sender<HealthDataStatistics>,
    },

    /// Drop records at or before `cutoff`
    CleanupOldRecords {
        cutoff: DateTime<Utc>,
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    GetLastRecord {
        respond_to: oneshot::Sender<Option<HealthCheckRecord>>,
    },

    GetRecordCount {
        respond_to: oneshot::Sender<usize>,
    },

    GetConfiguration {
        respond_to: oneshot::Sender<Option<ServiceConfiguration>>,
    },

    Shutdown,
}

/// Commands handled by a TrendActor
#[derive(Debug)]
pub enum TrendCommand {
    CalculateTrend {
        window: Duration,
        respond_to: oneshot::Sender<HealthTrendData>,
    },

    GetLatestTrend {
        respond_to: oneshot::Sender<HealthTrendData>,
    },

    /// Most recent `count` snapshots, newest first
    GetTrendHistory {
        count: usize,
        respond_to: oneshot::Sender<Vec<HealthTrendData>>,
    },

    /// Drop the cache and recompute the standard windows
    RefreshTrendData {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    Shutdown,
}

/// Commands handled by the AggregatorActor
#[derive(Debug)]
pub enum AggregatorCommand {
    Initialize {
        options: AggregatorOptions,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    RegisterService {
        config: ServiceConfiguration,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    ListServices {
        respond_to: oneshot::Sender<BTreeSet<String>>,
    },

    GetAllServiceTrends {
        window: Duration,
        respond_to: oneshot::Sender<Vec<HealthTrendData>>,
    },

    CompareServiceTrends {
        service_ids: Vec<String>,
        window: Duration,
        respond_to: oneshot::Sender<HealthTrendComparisonReport>,
    },

    GetSystemOverview {
        respond_to: oneshot::Sender<SystemHealthOverview>,
    },

    RefreshAllTrends {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Internal: a fan-out finished computing a fresh overview
    StoreOverview {
        overview: SystemHealthOverview,
        /// Overview generation the fan-out started from
        generation: u64,
    },

    /// Internal: a fan-out finished refreshing every service
    RefreshCompleted { at: DateTime<Utc> },

    Shutdown,
}
