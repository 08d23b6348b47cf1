//! Short-term health forecasts
//!
//! Forecasts need at least 100 records. With ten or more prior snapshots the
//! forecast blends a short and a long slope of the snapshot scores and adds a
//! daily cycle; otherwise it extrapolates the last six hours.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Timelike, Utc};

use crate::model::{HealthCheckRecord, HealthPrediction, HealthTrendData};

use super::direction::recent_history;
use super::score::{health_score, hour_bucket};
use super::stats::{linear_trend, variance};

const MIN_RECORDS: usize = 100;
const MIN_HISTORY: usize = 10;
const HORIZON_HOURS: i64 = 24;

pub fn generate_predictions(
    records: &[HealthCheckRecord],
    history: &[HealthTrendData],
    now: DateTime<Utc>,
) -> Vec<HealthPrediction> {
    if records.len() < MIN_RECORDS {
        return Vec::new();
    }

    if history.len() >= MIN_HISTORY {
        predictions_from_history(records, history, now)
    } else {
        simple_predictions(records, now)
    }
}

/// Score of the most recent hour of probes
fn current_health(records: &[HealthCheckRecord], now: DateTime<Utc>) -> f64 {
    let skip = records.len().saturating_sub(60);
    health_score(&records[skip..], now)
}

fn simple_predictions(records: &[HealthCheckRecord], now: DateTime<Utc>) -> Vec<HealthPrediction> {
    let recent_trend = recent_trend(records, now);
    let current = current_health(records, now);

    (1..=HORIZON_HOURS)
        .map(|hours| {
            let h = hours as f64;
            HealthPrediction {
                prediction_time: now + chrono::Duration::hours(hours),
                predicted_health_score: (current + recent_trend * h).clamp(0.0, 100.0),
                confidence: (1.0 - h * 0.03).max(0.0),
                reasoning_factors: format!("Based on recent {recent_trend:.1} health trend"),
            }
        })
        .collect()
}

fn predictions_from_history(
    records: &[HealthCheckRecord],
    history: &[HealthTrendData],
    now: DateTime<Utc>,
) -> Vec<HealthPrediction> {
    let recent = recent_history(history, 15);
    let scores: Vec<f64> = recent.iter().map(|t| t.overall_health_score).collect();

    let short_term = linear_trend(&scores[scores.len().saturating_sub(5)..]);
    let long_term = linear_trend(&scores);
    let current = current_health(records, now);
    let cyclical = cyclical_factor(&recent);
    let base_confidence = (history.len() as f64 / 20.0).min(0.9);

    (1..=HORIZON_HOURS)
        .map(|hours| {
            let h = hours as f64;
            let weight = (-h / 12.0).exp();
            let combined = short_term * weight + long_term * (1.0 - weight);
            let adjustment = cyclical * (2.0 * PI * h / 24.0).sin() * 2.0;

            let mut reasoning = format!(
                "Historical trend analysis: short-term {short_term:.1}, long-term {long_term:.1}"
            );
            if adjustment.abs() > 0.5 {
                reasoning.push_str(", cyclical pattern detected");
            }

            HealthPrediction {
                prediction_time: now + chrono::Duration::hours(hours),
                predicted_health_score: (current + combined * h + adjustment).clamp(0.0, 100.0),
                confidence: base_confidence * (1.0 - h * 0.02).max(0.0),
                reasoning_factors: reasoning,
            }
        })
        .collect()
}

/// Spread of the average score per hour of day, capped at 5
fn cyclical_factor(history: &[&HealthTrendData]) -> f64 {
    if history.len() < MIN_HISTORY {
        return 0.0;
    }

    let mut sums = [0.0f64; 24];
    let mut counts = [0usize; 24];
    for trend in history {
        let hour = trend.calculated_at.hour() as usize;
        sums[hour] += trend.overall_health_score;
        counts[hour] += 1;
    }

    let averages: Vec<f64> = sums
        .iter()
        .zip(counts.iter())
        .filter(|(_, count)| **count > 0)
        .map(|(sum, count)| sum / *count as f64)
        .filter(|average| *average > 0.0)
        .collect();

    (variance(&averages) / 100.0).min(5.0)
}

/// Slope of the hourly scores over the last six hours
fn recent_trend(records: &[HealthCheckRecord], now: DateTime<Utc>) -> f64 {
    let cutoff = now - chrono::Duration::hours(6);
    let recent: Vec<&HealthCheckRecord> = records.iter().filter(|r| r.timestamp > cutoff).collect();
    if recent.len() < 10 {
        return 0.0;
    }

    let mut hours: BTreeMap<DateTime<Utc>, Vec<&HealthCheckRecord>> = BTreeMap::new();
    for record in recent {
        hours.entry(hour_bucket(record.timestamp)).or_default().push(record);
    }

    let scores: Vec<f64> = hours
        .into_values()
        .map(|group| health_score(group, now))
        .collect();
    linear_trend(&scores)
}
