//! Health scoring and time-bucketed breakdowns

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, DurationRound, NaiveDate, Utc};

use crate::model::{
    DailyHealthSummary, HealthCheckRecord, HealthTrendDirection, HourlyHealthSummary,
    WeeklyHealthSummary,
};

use super::stats::{average_positive, linear_trend};

/// Largest number of points a single slow response can cost
const MAX_RESPONSE_TIME_PENALTY: f64 = 50.0;

/// Time-decayed health score in `[0, 100]`
///
/// Each record weighs `exp(-age_hours / 24)`; healthy records score 100 minus
/// a response time penalty, everything else scores 0.
pub fn health_score<'a>(
    records: impl IntoIterator<Item = &'a HealthCheckRecord>,
    now: DateTime<Utc>,
) -> f64 {
    let mut weighted_score = 0.0;
    let mut total_weight = 0.0;

    for record in records {
        let age_hours = (now - record.timestamp).num_milliseconds() as f64 / 3_600_000.0;
        let weight = (-age_hours / 24.0).exp();

        let mut score = if record.status.is_healthy() { 100.0 } else { 0.0 };
        if record.status.is_healthy() && !record.response_time.is_zero() {
            score -= (record.response_time.as_secs_f64() / 10.0).min(MAX_RESPONSE_TIME_PENALTY);
        }

        weighted_score += score * weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        weighted_score / total_weight
    } else {
        0.0
    }
}

pub fn availability_percentage(records: &[&HealthCheckRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let healthy = records.iter().filter(|r| r.status.is_healthy()).count();
    healthy as f64 / records.len() as f64 * 100.0
}

pub fn average_response_time(records: &[&HealthCheckRecord]) -> Duration {
    average_positive(records.iter().map(|r| r.response_time))
}

fn failure_count(records: &[&HealthCheckRecord]) -> usize {
    records.iter().filter(|r| r.status.is_critical()).count()
}

pub(crate) fn hour_bucket(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap_or(timestamp)
}

/// Monday of the week `date` falls in
pub(crate) fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

fn group_by<'a, K: Ord>(
    records: &'a [HealthCheckRecord],
    key: impl Fn(&HealthCheckRecord) -> K,
) -> BTreeMap<K, Vec<&'a HealthCheckRecord>> {
    let mut groups: BTreeMap<K, Vec<&HealthCheckRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(key(record)).or_default().push(record);
    }
    groups
}

pub fn hourly_breakdown(records: &[HealthCheckRecord], now: DateTime<Utc>) -> Vec<HourlyHealthSummary> {
    group_by(records, |r| hour_bucket(r.timestamp))
        .into_iter()
        .map(|(hour, group)| HourlyHealthSummary {
            hour,
            health_score: health_score(group.iter().copied(), now),
            availability_percentage: availability_percentage(&group),
            average_response_time: average_response_time(&group),
            data_points: group.len(),
            failure_count: failure_count(&group),
        })
        .collect()
}

pub fn daily_breakdown(records: &[HealthCheckRecord], now: DateTime<Utc>) -> Vec<DailyHealthSummary> {
    group_by(records, |r| r.timestamp.date_naive())
        .into_iter()
        .map(|(date, group)| DailyHealthSummary {
            date,
            health_score: health_score(group.iter().copied(), now),
            availability_percentage: availability_percentage(&group),
            average_response_time: average_response_time(&group),
            max_response_time: group
                .iter()
                .map(|r| r.response_time)
                .max()
                .unwrap_or(Duration::ZERO),
            total_checks: group.len(),
            failed_checks: failure_count(&group),
            common_errors: common_errors(&group, 3),
        })
        .collect()
}

pub fn weekly_breakdown(records: &[HealthCheckRecord], now: DateTime<Utc>) -> Vec<WeeklyHealthSummary> {
    group_by(records, |r| week_start(r.timestamp.date_naive()))
        .into_iter()
        .map(|(week_starting, group)| WeeklyHealthSummary {
            week_starting,
            health_score: health_score(group.iter().copied(), now),
            availability_percentage: availability_percentage(&group),
            average_response_time: average_response_time(&group),
            total_checks: group.len(),
            failed_checks: group
                .iter()
                .filter(|r| r.status == crate::model::Status::Critical)
                .count(),
            week_trend: week_trend(&group, now),
        })
        .collect()
}

/// Error messages of failed records, most frequent first
///
/// Ties keep the order in which the messages first appeared.
fn common_errors(records: &[&HealthCheckRecord], limit: usize) -> Vec<String> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();

    for message in records
        .iter()
        .filter(|r| r.status.is_critical())
        .filter_map(|r| r.error_message.as_deref())
        .filter(|m| !m.is_empty())
    {
        let count = counts.entry(message).or_insert(0);
        if *count == 0 {
            order.push(message);
        }
        *count += 1;
    }

    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().take(limit).map(String::from).collect()
}

/// Direction of the daily scores within one week
fn week_trend(records: &[&HealthCheckRecord], now: DateTime<Utc>) -> HealthTrendDirection {
    if records.len() < 50 {
        return HealthTrendDirection::Unknown;
    }

    let mut by_day: BTreeMap<NaiveDate, Vec<&HealthCheckRecord>> = BTreeMap::new();
    for record in records {
        by_day.entry(record.timestamp.date_naive()).or_default().push(record);
    }

    let daily_scores: Vec<f64> = by_day
        .values()
        .map(|day| health_score(day.iter().copied(), now))
        .collect();

    let slope = linear_trend(&daily_scores);
    if slope.abs() < 2.0 {
        HealthTrendDirection::Stable
    } else if slope > 0.0 {
        HealthTrendDirection::Improving
    } else {
        HealthTrendDirection::Declining
    }
}
