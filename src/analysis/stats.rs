//! Small numeric helpers shared by the analysis passes

use std::time::Duration;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Ordinary least squares slope of `values` against their index
///
/// Returns 0 for fewer than two points.
pub fn linear_trend(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);

    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Sample variance (n - 1 denominator), 0 for fewer than two points
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Mean of the strictly positive durations, zero when there are none
pub fn average_positive(durations: impl IntoIterator<Item = Duration>) -> Duration {
    let (sum, count) = durations
        .into_iter()
        .filter(|d| !d.is_zero())
        .fold((0.0, 0u32), |(sum, count), d| (sum + d.as_secs_f64(), count + 1));

    if count == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(sum / f64::from(count))
    }
}
