//! Outlier-resistant reduction of raw samples into finalized metrics.
//!
//! Each metric kind has its own robust estimator. None of them raise on an
//! empty sample set: a metric with zero usable samples falls back to a
//! tagged estimate so a run always completes with a full result, while the
//! provenance tag keeps a guess distinguishable from a measurement.

use crate::sample::{
    AggregatedMetric, EstimateReason, MetricKind, MetricValue, Sample,
};
use crate::stats;
use log::warn;

/// Conservative ping substituted when every latency probe failed.
pub const FALLBACK_PING_MS: f64 = 500.0;

/// Fraction of the ping substituted for jitter when no ticks succeeded.
const JITTER_FROM_PING_RATIO: f64 = 0.25;

fn ok_values(samples: &[Sample]) -> Vec<f64> {
    samples.iter().filter(|s| s.is_ok()).map(|s| s.value).collect()
}

fn rejected_count(samples: &[Sample]) -> usize {
    samples.iter().filter(|s| !s.is_ok()).count()
}

fn finish(
    kind: MetricKind,
    measured: Option<f64>,
    fallback: MetricValue,
    samples: &[Sample],
) -> AggregatedMetric {
    let rejected = rejected_count(samples);

    let value = match measured {
        Some(v) => MetricValue::Measured(v),
        None => {
            warn!("no usable {} samples, falling back to an estimate", kind);
            fallback
        }
    };

    AggregatedMetric {
        kind,
        value,
        sample_count: samples.len() - rejected,
        rejected_count: rejected,
    }
}

/// Single-best ping: the minimum of all usable samples.
///
/// Ping is modeled as true RTT plus incidental overhead; overhead can only
/// add delay, so the minimum best approximates the true RTT.
pub fn ping_best(samples: &[Sample]) -> AggregatedMetric {
    finish(
        MetricKind::Ping,
        stats::minimum(&ok_values(samples)),
        MetricValue::Estimated {
            value: FALLBACK_PING_MS,
            reason: EstimateReason::NoSamples,
        },
        samples,
    )
}

/// Multi-server ping: trimmed mean across usable samples.
///
/// Dropping the single highest and lowest suppresses one-off spikes without
/// discarding most of the data; below three samples a plain mean is used.
pub fn ping_trimmed(samples: &[Sample]) -> AggregatedMetric {
    finish(
        MetricKind::Ping,
        stats::trimmed_mean(&ok_values(samples)),
        MetricValue::Estimated {
            value: FALLBACK_PING_MS,
            reason: EstimateReason::NoSamples,
        },
        samples,
    )
}

/// Jitter: mean of consecutive absolute differences between successive
/// latency ticks, matching the instantaneous-variation definition rather
/// than a population variance.
///
/// Sample order must be probe order; the collector guarantees it.
pub fn jitter(samples: &[Sample], ping_hint: Option<f64>) -> AggregatedMetric {
    let fallback = match ping_hint {
        Some(ping_ms) => MetricValue::Estimated {
            value: ping_ms * JITTER_FROM_PING_RATIO,
            reason: EstimateReason::DerivedFromPing,
        },
        None => MetricValue::Estimated {
            value: FALLBACK_PING_MS * JITTER_FROM_PING_RATIO,
            reason: EstimateReason::NoSamples,
        },
    };

    finish(
        MetricKind::Jitter,
        stats::consecutive_variation(&ok_values(samples)),
        fallback,
        samples,
    )
}

/// Throughput: weighted mean of per-size speeds, ordered by ascending
/// payload size with weight `index + 1`.
///
/// Small transfers are dominated by fixed per-request overhead and
/// understate steady-state throughput, so larger payloads count more.
pub fn throughput(
    kind: MetricKind,
    samples: &[Sample],
    ping_hint: Option<f64>,
) -> AggregatedMetric {
    let mut usable: Vec<&Sample> =
        samples.iter().filter(|s| s.is_ok()).collect();
    usable.sort_by_key(|s| s.byte_size.unwrap_or(0));

    let speeds: Vec<f64> = usable.iter().map(|s| s.value).collect();

    let fallback = match ping_hint {
        Some(ping_ms) => MetricValue::Estimated {
            value: throughput_estimate_from_ping(ping_ms),
            reason: EstimateReason::DerivedFromPing,
        },
        None => MetricValue::Estimated {
            value: throughput_estimate_from_ping(FALLBACK_PING_MS),
            reason: EstimateReason::NoSamples,
        },
    };

    finish(kind, stats::position_weighted_mean(&speeds), fallback, samples)
}

/// Fixed heuristic curve mapping a measured ping to a conservative
/// throughput estimate, used only when every transfer attempt failed.
fn throughput_estimate_from_ping(ping_ms: f64) -> f64 {
    if ping_ms <= 20.0 {
        10.0
    } else if ping_ms <= 50.0 {
        5.0
    } else if ping_ms <= 100.0 {
        2.0
    } else if ping_ms <= 200.0 {
        1.0
    } else if ping_ms <= 500.0 {
        0.5
    } else {
        0.1
    }
}
