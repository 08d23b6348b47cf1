//! SLA compliance and error budget

use std::time::Duration;

use crate::config::SlaTarget;
use crate::model::{HealthCheckRecord, SlaMetrics};

use super::stats::average_positive;

const MINUTES_PER_MONTH: f64 = 30.0 * 24.0 * 60.0;

/// Tolerance for comparing a measured ratio against a configured percentage
const AVAILABILITY_EPSILON: f64 = 1e-12;

pub fn sla_metrics(records: &[HealthCheckRecord], target: &SlaTarget) -> SlaMetrics {
    let mut metrics = SlaMetrics::with_target(target);

    let (Some(first), Some(last)) = (
        records.iter().map(|r| r.timestamp).min(),
        records.iter().map(|r| r.timestamp).max(),
    ) else {
        return metrics;
    };

    let total = records.len() as f64;
    let healthy = records.iter().filter(|r| r.status.is_healthy()).count() as f64;
    let downtime = total - healthy;

    metrics.actual_availability = healthy / total;
    metrics.actual_average_response_time = average_positive(records.iter().map(|r| r.response_time));
    metrics.meeting_availability_sla =
        metrics.actual_availability + AVAILABILITY_EPSILON >= metrics.target_availability;
    metrics.meeting_response_time_sla =
        metrics.actual_average_response_time <= metrics.target_response_time;

    let allowed_downtime = (1.0 - metrics.target_availability) * total;
    metrics.error_budget_remaining = if allowed_downtime > 0.0 {
        ((allowed_downtime - downtime) / allowed_downtime).max(0.0)
    } else if downtime == 0.0 {
        1.0
    } else {
        0.0
    };

    // Spans shorter than a minute extrapolate as if they covered one minute
    let span_minutes = ((last - first).num_milliseconds() as f64 / 60_000.0).max(1.0);
    let monthly_multiplier = (MINUTES_PER_MONTH / span_minutes).floor();
    metrics.estimated_downtime_this_month =
        Duration::from_secs_f64(downtime * monthly_multiplier * 60.0);

    metrics
}
