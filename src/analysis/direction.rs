//! Trend direction and confidence
//!
//! With at least five prior snapshots the direction is read from the history
//! of health scores, which is smoother than the raw records. Otherwise the
//! record span is cut into four segments and the segment scores are
//! regressed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{HealthCheckRecord, HealthTrendData, HealthTrendDirection};

use super::score::{health_score, hourly_breakdown};
use super::stats::{linear_trend, variance};

const MIN_RECORDS_FOR_TREND: usize = 10;
const MIN_HISTORY_FOR_TREND: usize = 5;
const MIN_HISTORY_FOR_CONFIDENCE: usize = 10;

/// The `count` most recent snapshots, oldest first
pub(crate) fn recent_history(history: &[HealthTrendData], count: usize) -> Vec<&HealthTrendData> {
    let mut recent: Vec<&HealthTrendData> = history.iter().collect();
    recent.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at));
    recent.truncate(count);
    recent.reverse();
    recent
}

fn by_sign(slope: f64) -> HealthTrendDirection {
    if slope > 0.0 {
        HealthTrendDirection::Improving
    } else {
        HealthTrendDirection::Declining
    }
}

pub fn health_trend(
    records: &[HealthCheckRecord],
    history: &[HealthTrendData],
    now: DateTime<Utc>,
) -> HealthTrendDirection {
    if records.len() < MIN_RECORDS_FOR_TREND {
        return HealthTrendDirection::Unknown;
    }

    if history.len() >= MIN_HISTORY_FOR_TREND {
        trend_from_history(history)
    } else {
        trend_from_records(records, now)
    }
}

fn trend_from_history(history: &[HealthTrendData]) -> HealthTrendDirection {
    let recent = recent_history(history, 10);
    if recent.len() < 3 {
        return HealthTrendDirection::Unknown;
    }

    let scores: Vec<f64> = recent.iter().map(|t| t.overall_health_score).collect();
    let slope = linear_trend(&scores);

    if variance(&scores) > 200.0 {
        HealthTrendDirection::Volatile
    } else if slope.abs() < 0.5 {
        HealthTrendDirection::Stable
    } else if slope > 2.0 {
        HealthTrendDirection::Improving
    } else if slope < -2.0 {
        HealthTrendDirection::Declining
    } else {
        by_sign(slope)
    }
}

fn trend_from_records(records: &[HealthCheckRecord], now: DateTime<Utc>) -> HealthTrendDirection {
    let (Some(start), Some(end)) = (
        records.iter().map(|r| r.timestamp).min(),
        records.iter().map(|r| r.timestamp).max(),
    ) else {
        return HealthTrendDirection::Unknown;
    };

    let segment = (end - start) / 4;
    let scores: Vec<f64> = (0..4)
        .map(|i| {
            let segment_start = start + segment * i;
            let segment_end = start + segment * (i + 1);
            let in_segment: Vec<&HealthCheckRecord> = records
                .iter()
                .filter(|r| r.timestamp >= segment_start && r.timestamp < segment_end)
                .collect();
            if in_segment.is_empty() {
                0.0
            } else {
                health_score(in_segment, now)
            }
        })
        .collect();

    let slope = linear_trend(&scores);

    if slope.abs() < 1.0 {
        HealthTrendDirection::Stable
    } else if slope > 5.0 {
        HealthTrendDirection::Improving
    } else if slope < -5.0 {
        HealthTrendDirection::Declining
    } else if variance(&scores) > 100.0 {
        HealthTrendDirection::Volatile
    } else {
        by_sign(slope)
    }
}

/// Response time direction; a falling response time is an improvement
pub fn response_time_trend(
    records: &[HealthCheckRecord],
    history: &[HealthTrendData],
) -> HealthTrendDirection {
    if history.len() >= MIN_HISTORY_FOR_TREND {
        let averages: Vec<f64> = recent_history(history, 8)
            .iter()
            .map(|t| t.average_response_time_ms())
            .collect();
        return inverted_direction(linear_trend(&averages), 5.0);
    }

    let response_times: Vec<f64> = records
        .iter()
        .filter(|r| !r.response_time.is_zero())
        .map(|r| r.response_time_ms())
        .collect();

    if response_times.len() < MIN_RECORDS_FOR_TREND {
        return HealthTrendDirection::Unknown;
    }

    inverted_direction(linear_trend(&response_times), 10.0)
}

fn inverted_direction(slope: f64, stable_below: f64) -> HealthTrendDirection {
    if slope.abs() < stable_below {
        HealthTrendDirection::Stable
    } else if slope < 0.0 {
        HealthTrendDirection::Improving
    } else {
        HealthTrendDirection::Declining
    }
}

/// Confidence in `[0, 1]` that the reported direction is meaningful
pub fn trend_confidence(
    records: &[HealthCheckRecord],
    history: &[HealthTrendData],
    now: DateTime<Utc>,
) -> f64 {
    if records.len() < 50 {
        return (records.len() as f64 / 50.0).min(1.0);
    }

    let volume = (records.len() as f64 / 1000.0).min(1.0);
    let hourly_scores: Vec<f64> = hourly_breakdown(records, now)
        .iter()
        .map(|h| h.health_score)
        .collect();
    let consistency = (1.0 - variance(&hourly_scores) / 100.0).max(0.0);
    let base = (volume + consistency) / 2.0;

    if history.len() >= MIN_HISTORY_FOR_CONFIDENCE {
        (base + history_confidence(history)) / 2.0
    } else {
        base
    }
}

fn history_confidence(history: &[HealthTrendData]) -> f64 {
    let length = (history.len() as f64 / 50.0).min(1.0);

    let recent = recent_history(history, 10);
    let mut direction_counts: HashMap<HealthTrendDirection, usize> = HashMap::new();
    for trend in &recent {
        *direction_counts.entry(trend.health_trend).or_insert(0) += 1;
    }
    let dominant = direction_counts.values().copied().max().unwrap_or(0);
    let consistency = if recent.is_empty() {
        0.0
    } else {
        dominant as f64 / recent.len() as f64
    };

    let confidences: Vec<f64> = recent.iter().map(|t| t.trend_confidence).collect();
    let stability = (1.0 - variance(&confidences)).max(0.0);

    (length + consistency + stability) / 3.0
}
