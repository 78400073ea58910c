//! Pure numeric helpers shared by the aggregation layer.

use std::time::Duration;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn minimum(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Mean after discarding the single highest and single lowest value.
///
/// Falls back to a plain mean when fewer than three values are present,
/// since trimming would otherwise discard most of the data.
pub fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.len() < 3 {
        return mean(values);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    mean(&sorted[1..sorted.len() - 1])
}

/// Weighted mean where entry `i` carries weight `i + 1`.
///
/// Callers order values so that later entries deserve more trust; the
/// weights then favor them proportionally.
pub fn position_weighted_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for (index, value) in values.iter().enumerate() {
        let weight = (index + 1) as f64;
        weighted_sum += value * weight;
        weight_total += weight;
    }

    Some(weighted_sum / weight_total)
}

/// Mean magnitude of consecutive differences.
///
/// Needs at least two values; a constant sequence yields exactly zero.
pub fn consecutive_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let diffs: Vec<f64> =
        values.windows(2).map(|pair| (pair[0] - pair[1]).abs()).collect();

    mean(&diffs)
}

/// Convert a byte count over an elapsed duration to megabits per second.
pub fn megabits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }

    (bytes as f64 * 8.0) / seconds / 1_000_000.0
}
