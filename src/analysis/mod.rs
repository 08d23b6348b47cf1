//! Trend analysis engine
//!
//! Everything in this module is a pure function of its inputs: the probe
//! records, the prior trend history and the evaluation instant. Nothing here
//! performs I/O or touches shared state, which keeps the actors thin and the
//! algorithms testable with fixed clocks.
//!
//! ## Passes
//!
//! - [`score`]: time-decayed health score and hour/day/week breakdowns
//! - [`direction`]: regression-based trend direction and confidence
//! - [`anomaly`]: outages, response time spikes, failure clusters
//! - [`sla`]: SLA compliance, error budget, monthly downtime estimate
//! - [`prediction`]: 24 hourly health forecasts

pub mod anomaly;
pub mod direction;
pub mod prediction;
pub mod score;
pub mod sla;
pub mod stats;

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SlaTarget;
use crate::model::{HealthCheckRecord, HealthTrendData};

/// Computes [`HealthTrendData`] snapshots from probe records
#[derive(Debug, Clone, Default)]
pub struct TrendEngine {
    sla: SlaTarget,
}

impl TrendEngine {
    pub fn new(sla: SlaTarget) -> Self {
        Self { sla }
    }

    pub fn sla_target(&self) -> &SlaTarget {
        &self.sla
    }

    /// Build a complete snapshot for `window`
    ///
    /// `history` holds earlier snapshots of the same service in any order;
    /// with enough of them, direction and forecasts are derived from the
    /// history instead of the raw records.
    pub fn calculate(
        &self,
        service_id: &str,
        records: &[HealthCheckRecord],
        window: Duration,
        history: &[HealthTrendData],
        now: DateTime<Utc>,
    ) -> HealthTrendData {
        if records.is_empty() {
            return HealthTrendData::empty_with_sla(service_id, window, now, &self.sla);
        }

        let records: Cow<'_, [HealthCheckRecord]> = if records.is_sorted_by_key(|r| r.timestamp) {
            Cow::Borrowed(records)
        } else {
            let mut sorted = records.to_vec();
            sorted.sort_by_key(|r| r.timestamp);
            Cow::Owned(sorted)
        };
        let records = records.as_ref();
        let all: Vec<&HealthCheckRecord> = records.iter().collect();

        HealthTrendData {
            service_id: service_id.to_string(),
            calculated_at: now,
            time_window: window,
            overall_health_score: score::health_score(records, now),
            availability_percentage: score::availability_percentage(&all),
            average_response_time: score::average_response_time(&all),
            total_data_points: records.len(),
            health_trend: direction::health_trend(records, history, now),
            response_time_trend: direction::response_time_trend(records, history),
            trend_confidence: direction::trend_confidence(records, history, now),
            hourly_breakdown: score::hourly_breakdown(records, now),
            daily_breakdown: score::daily_breakdown(records, now),
            weekly_breakdown: score::weekly_breakdown(records, now),
            detected_anomalies: anomaly::detect_anomalies(records),
            sla_metrics: sla::sla_metrics(records, &self.sla),
            predictions: prediction::generate_predictions(records, history, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnomalyType, HealthTrendDirection, SlaMetrics};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, 12, 0, 0).unwrap()
    }

    fn minutes_ago(m: i64) -> DateTime<Utc> {
        now() - chrono::Duration::minutes(m)
    }

    #[test]
    fn test_empty_records() {
        let engine = TrendEngine::default();
        let trend = engine.calculate("svc", &[], Duration::from_secs(3600), &[], now());

        assert_eq!(trend.total_data_points, 0);
        assert_eq!(trend.availability_percentage, 0.0);
        assert_eq!(trend.overall_health_score, 0.0);
        assert_eq!(trend.health_trend, HealthTrendDirection::Unknown);
        assert!(trend.detected_anomalies.is_empty());
        assert_eq!(trend.sla_metrics, SlaMetrics::default());
        assert_eq!(trend.time_window, Duration::from_secs(3600));
    }

    #[test]
    fn test_seven_healthy_three_critical() {
        let mut records: Vec<_> = (0..7)
            .map(|i| HealthCheckRecord::healthy(minutes_ago(10 - i), Duration::from_millis(120)))
            .collect();
        records.extend((7..10).map(|i| HealthCheckRecord::critical(minutes_ago(10 - i), Duration::ZERO, "down")));

        let trend = TrendEngine::default().calculate("svc", &records, Duration::from_secs(3600), &[], now());
        assert!((trend.availability_percentage - 70.0).abs() < 1e-9);
        assert_eq!(trend.total_data_points, 10);
        assert_eq!(trend.average_response_time, Duration::from_millis(120));
    }

    #[test]
    fn test_unsorted_records_are_ordered() {
        let mut records: Vec<_> = (0..6)
            .map(|i| HealthCheckRecord::critical(minutes_ago(20 - i), Duration::ZERO, "down"))
            .collect();
        records.push(HealthCheckRecord::healthy(minutes_ago(1), Duration::ZERO));
        records.reverse();

        let trend = TrendEngine::default().calculate("svc", &records, Duration::from_secs(3600), &[], now());
        let outages: Vec<_> = trend
            .detected_anomalies
            .iter()
            .filter(|a| a.anomaly_type == AnomalyType::LongOutage)
            .collect();
        assert_eq!(outages.len(), 1);
        assert_eq!(outages[0].start_time, minutes_ago(20));
    }

    #[test]
    fn test_snapshot_carries_configured_sla() {
        let engine = TrendEngine::new(SlaTarget {
            availability_percentage: 95.0,
            response_time_seconds: 2.0,
        });
        let records: Vec<_> = (0..20)
            .map(|i| HealthCheckRecord::healthy(minutes_ago(20 - i), Duration::from_millis(1500)))
            .collect();

        let trend = engine.calculate("svc", &records, Duration::from_secs(86_400), &[], now());
        assert!((trend.sla_metrics.target_availability - 0.95).abs() < 1e-12);
        assert!(trend.sla_metrics.meeting_response_time_sla);
        assert!(trend.overall_health_score > 90.0);
    }
}
