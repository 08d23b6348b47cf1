//! Domain model shared by the actors, the trend engine and the API surface
//!
//! Every type here is a plain value: produced once, cloned freely, and
//! serialized with serde when an entity persists its state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ServiceType, SlaTarget};

/// Outcome classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Status {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Critical,
}

impl Status {
    pub fn is_healthy(self) -> bool {
        matches!(self, Status::Healthy)
    }

    /// Degraded counts as a failure everywhere failures are counted
    pub fn is_critical(self) -> bool {
        matches!(self, Status::Critical | Status::Degraded)
    }
}

/// One probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub response_time: Duration,
    pub error_message: Option<String>,
}

impl HealthCheckRecord {
    pub fn healthy(timestamp: DateTime<Utc>, response_time: Duration) -> Self {
        Self {
            timestamp,
            status: Status::Healthy,
            response_time,
            error_message: None,
        }
    }

    pub fn critical(timestamp: DateTime<Utc>, response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            status: Status::Critical,
            response_time,
            error_message: Some(error.into()),
        }
    }

    pub fn response_time_ms(&self) -> f64 {
        self.response_time.as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum HealthTrendDirection {
    Improving,
    Stable,
    Declining,
    Volatile,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthTrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealthTrendDirection::Improving => "Improving",
            HealthTrendDirection::Stable => "Stable",
            HealthTrendDirection::Declining => "Declining",
            HealthTrendDirection::Volatile => "Volatile",
            HealthTrendDirection::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyHealthSummary {
    pub hour: DateTime<Utc>,
    pub health_score: f64,
    pub availability_percentage: f64,
    pub average_response_time: Duration,
    pub data_points: usize,
    pub failure_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHealthSummary {
    pub date: NaiveDate,
    pub health_score: f64,
    pub availability_percentage: f64,
    pub average_response_time: Duration,
    pub max_response_time: Duration,
    pub total_checks: usize,
    pub failed_checks: usize,
    /// Most frequent error messages of failed checks, most frequent first
    pub common_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyHealthSummary {
    /// Monday the week starts on
    pub week_starting: NaiveDate,
    pub health_score: f64,
    pub availability_percentage: f64,
    pub average_response_time: Duration,
    pub total_checks: usize,
    pub failed_checks: usize,
    pub week_trend: HealthTrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyType {
    HighResponseTime,
    FrequentFailures,
    LongOutage,
}

/// Measurements captured when an anomaly is detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyDetails {
    Outage {
        consecutive_failures: usize,
    },
    ResponseTimeSpike {
        response_time_ms: f64,
        average_response_time_ms: f64,
    },
    FailureCluster {
        failure_rate: f64,
        average_failure_rate: f64,
        failed_checks: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAnomaly {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub anomaly_type: AnomalyType,
    /// In `[0, 1]`
    pub severity: f64,
    pub description: String,
    pub details: AnomalyDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaMetrics {
    /// Fraction, e.g. `0.999`
    pub target_availability: f64,
    pub target_response_time: Duration,
    /// Fraction of healthy records
    pub actual_availability: f64,
    pub actual_average_response_time: Duration,
    pub meeting_availability_sla: bool,
    pub meeting_response_time_sla: bool,
    pub error_budget_remaining: f64,
    pub estimated_downtime_this_month: Duration,
}

impl SlaMetrics {
    /// Metrics with the given targets and no observations
    pub fn with_target(target: &SlaTarget) -> Self {
        Self {
            target_availability: target.availability_fraction(),
            target_response_time: target.response_time(),
            actual_availability: 0.0,
            actual_average_response_time: Duration::ZERO,
            meeting_availability_sla: false,
            meeting_response_time_sla: false,
            error_budget_remaining: 0.0,
            estimated_downtime_this_month: Duration::ZERO,
        }
    }
}

impl Default for SlaMetrics {
    fn default() -> Self {
        Self::with_target(&SlaTarget::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPrediction {
    pub prediction_time: DateTime<Utc>,
    pub predicted_health_score: f64,
    pub confidence: f64,
    pub reasoning_factors: String,
}

/// Trend snapshot for one service over one analysis window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTrendData {
    pub service_id: String,
    pub calculated_at: DateTime<Utc>,
    pub time_window: Duration,

    pub overall_health_score: f64,
    pub availability_percentage: f64,
    pub average_response_time: Duration,
    pub total_data_points: usize,

    pub health_trend: HealthTrendDirection,
    pub response_time_trend: HealthTrendDirection,
    /// In `[0, 1]`
    pub trend_confidence: f64,

    pub hourly_breakdown: Vec<HourlyHealthSummary>,
    pub daily_breakdown: Vec<DailyHealthSummary>,
    pub weekly_breakdown: Vec<WeeklyHealthSummary>,

    pub detected_anomalies: Vec<HealthAnomaly>,
    pub sla_metrics: SlaMetrics,
    pub predictions: Vec<HealthPrediction>,
}

impl HealthTrendData {
    /// Snapshot with no data behind it
    pub fn empty(service_id: impl Into<String>, window: Duration, calculated_at: DateTime<Utc>) -> Self {
        Self::empty_with_sla(service_id, window, calculated_at, &SlaTarget::default())
    }

    pub fn empty_with_sla(
        service_id: impl Into<String>,
        window: Duration,
        calculated_at: DateTime<Utc>,
        sla: &SlaTarget,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            calculated_at,
            time_window: window,
            overall_health_score: 0.0,
            availability_percentage: 0.0,
            average_response_time: Duration::ZERO,
            total_data_points: 0,
            health_trend: HealthTrendDirection::Unknown,
            response_time_trend: HealthTrendDirection::Unknown,
            trend_confidence: 0.0,
            hourly_breakdown: Vec::new(),
            daily_breakdown: Vec::new(),
            weekly_breakdown: Vec::new(),
            detected_anomalies: Vec::new(),
            sla_metrics: SlaMetrics::with_target(sla),
            predictions: Vec::new(),
        }
    }

    pub fn average_response_time_ms(&self) -> f64 {
        self.average_response_time.as_secs_f64() * 1000.0
    }
}

/// Zero-valued when no records matched the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthDataStatistics {
    pub total_records: usize,
    pub availability_percentage: f64,
    pub average_response_time: Duration,
    pub max_response_time: Duration,
    pub min_response_time: Duration,
    pub failure_count: usize,
    pub first_record: Option<DateTime<Utc>>,
    pub last_record: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthAlert {
    pub service_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthOverview {
    pub generated_at: DateTime<Utc>,
    pub total_services: usize,
    pub healthy_services: usize,
    pub problematic_services: usize,
    pub overall_system_health: f64,
    /// Severity descending, then most recent first
    pub alerts: Vec<SystemHealthAlert>,
    pub services_by_trend: BTreeMap<HealthTrendDirection, usize>,
}

impl SystemHealthOverview {
    pub fn empty(total_services: usize, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            total_services,
            healthy_services: 0,
            problematic_services: 0,
            overall_system_health: 0.0,
            alerts: Vec::new(),
            services_by_trend: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTrendComparison {
    pub service_id: String,
    pub trend_data: HealthTrendData,
    /// 1 is the healthiest
    pub health_rank: usize,
    pub relative_health_score: f64,
    pub health_insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemHealthRanking {
    pub healthiest_services: Vec<String>,
    pub problematic_services: Vec<String>,
    pub improving_services: Vec<String>,
    pub declining_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthTrendComparisonReport {
    pub generated_at: DateTime<Utc>,
    pub analysis_window: Duration,
    pub service_comparisons: Vec<ServiceTrendComparison>,
    pub health_ranking: SystemHealthRanking,
}

impl HealthTrendComparisonReport {
    pub fn empty(analysis_window: Duration, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            analysis_window,
            service_comparisons: Vec::new(),
            health_ranking: SystemHealthRanking::default(),
        }
    }
}

/// Listing entry for a configured service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: String,
    pub name: String,
    pub service_type: ServiceType,
    pub last_check_result: Option<HealthCheckRecord>,
}
