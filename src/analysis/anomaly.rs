//! Anomaly detection over raw probe records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{AnomalyDetails, AnomalyType, HealthAnomaly, HealthCheckRecord};

use super::score::hour_bucket;
use super::stats::mean;

/// Consecutive failures needed before a run counts as an outage
const OUTAGE_MIN_FAILURES: usize = 5;
const SPIKE_MIN_SAMPLES: usize = 10;
const SPIKE_FACTOR: f64 = 3.0;
const FAILURE_RATE_FACTOR: f64 = 3.0;
const FAILURE_RATE_FLOOR: f64 = 0.1;

/// Run every detector and merge the results by start time
pub fn detect_anomalies(records: &[HealthCheckRecord]) -> Vec<HealthAnomaly> {
    let mut anomalies = detect_outages(records);
    anomalies.extend(detect_response_time_spikes(records));
    anomalies.extend(detect_failure_patterns(records));
    anomalies.sort_by_key(|a| a.start_time);
    anomalies
}

/// Runs of failures closed by a recovery
///
/// A run that is still open at the end of the data is not reported until the
/// service recovers.
fn detect_outages(records: &[HealthCheckRecord]) -> Vec<HealthAnomaly> {
    let mut ordered: Vec<&HealthCheckRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut anomalies = Vec::new();
    let mut consecutive_failures = 0usize;
    let mut outage_start: Option<DateTime<Utc>> = None;

    for record in ordered {
        if record.status.is_critical() {
            consecutive_failures += 1;
            outage_start.get_or_insert(record.timestamp);
            continue;
        }

        let run_start = outage_start.take();
        if let Some(start_time) = run_start.filter(|_| consecutive_failures >= OUTAGE_MIN_FAILURES) {
            anomalies.push(HealthAnomaly {
                start_time,
                end_time: record.timestamp,
                anomaly_type: AnomalyType::LongOutage,
                severity: (consecutive_failures as f64 / 60.0).min(1.0),
                description: format!("Service outage lasting {consecutive_failures} minutes"),
                details: AnomalyDetails::Outage {
                    consecutive_failures,
                },
            });
        }
        consecutive_failures = 0;
    }

    anomalies
}

fn detect_response_time_spikes(records: &[HealthCheckRecord]) -> Vec<HealthAnomaly> {
    let timed: Vec<&HealthCheckRecord> = records
        .iter()
        .filter(|r| !r.response_time.is_zero())
        .collect();

    if timed.len() < SPIKE_MIN_SAMPLES {
        return Vec::new();
    }

    let samples: Vec<f64> = timed.iter().map(|r| r.response_time_ms()).collect();
    let average = mean(&samples);
    let threshold = average * SPIKE_FACTOR;

    timed
        .into_iter()
        .filter(|r| r.response_time_ms() > threshold)
        .map(|spike| {
            let response_time_ms = spike.response_time_ms();
            HealthAnomaly {
                start_time: spike.timestamp,
                end_time: spike.timestamp + chrono::Duration::minutes(1),
                anomaly_type: AnomalyType::HighResponseTime,
                severity: (response_time_ms / (average * 10.0)).min(1.0),
                description: format!(
                    "Response time spike: {response_time_ms:.0}ms (avg: {average:.0}ms)"
                ),
                details: AnomalyDetails::ResponseTimeSpike {
                    response_time_ms,
                    average_response_time_ms: average,
                },
            }
        })
        .collect()
}

/// Hours whose failure rate is well above the overall rate
fn detect_failure_patterns(records: &[HealthCheckRecord]) -> Vec<HealthAnomaly> {
    if records.is_empty() {
        return Vec::new();
    }

    let overall_failures = records.iter().filter(|r| r.status.is_critical()).count();
    let average_failure_rate = overall_failures as f64 / records.len() as f64;

    let mut hours: BTreeMap<DateTime<Utc>, (usize, usize)> = BTreeMap::new();
    for record in records {
        let (total, failed) = hours.entry(hour_bucket(record.timestamp)).or_insert((0, 0));
        *total += 1;
        if record.status.is_critical() {
            *failed += 1;
        }
    }

    hours
        .into_iter()
        .filter_map(|(hour, (total, failed_checks))| {
            let failure_rate = failed_checks as f64 / total as f64;
            if failure_rate <= average_failure_rate * FAILURE_RATE_FACTOR
                || failure_rate <= FAILURE_RATE_FLOOR
            {
                return None;
            }

            Some(HealthAnomaly {
                start_time: hour,
                end_time: hour + chrono::Duration::hours(1),
                anomaly_type: AnomalyType::FrequentFailures,
                severity: (failure_rate / 0.5).min(1.0),
                description: format!(
                    "High failure rate: {:.1}% (avg: {:.1}%)",
                    failure_rate * 100.0,
                    average_failure_rate * 100.0
                ),
                details: AnomalyDetails::FailureCluster {
                    failure_rate,
                    average_failure_rate,
                    failed_checks,
                },
            })
        })
        .collect()
}
