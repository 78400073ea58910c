//! Core measurement data model.
//!
//! A [`Sample`] is one raw measurement attempt, possibly failed. Samples are
//! created by the collector, reduced by the aggregation layer into one
//! [`AggregatedMetric`] per metric kind, and then discarded. Nothing here is
//! persisted.

use serde::Serialize;
use std::fmt;

/// The four finalized metrics a test run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Ping,
    Jitter,
    Download,
    Upload,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Ping => "ping",
            MetricKind::Jitter => "jitter",
            MetricKind::Download => "download",
            MetricKind::Upload => "upload",
        };
        write!(f, "{}", name)
    }
}

/// What kind of attempt produced a sample.
///
/// Jitter ticks are ordinary latency probes, but they are kept distinct
/// because their ordering matters to the aggregation (consecutive
/// differences) while plain ping samples are order-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Ping,
    JitterTick,
    Download,
    Upload,
}

/// Outcome of one measurement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The attempt completed and its value passed sanity screening.
    Ok,
    /// The attempt exceeded its per-attempt time budget.
    Timeout,
    /// The attempt failed at the transport layer or the endpoint rejected it.
    TransportError,
    /// The attempt completed but its value failed sanity bounds.
    RejectedOutlier,
}

/// One raw measurement attempt.
///
/// `value` is milliseconds for latency kinds and megabits per second for
/// throughput kinds. For failed attempts the value is meaningless and the
/// aggregation layer never reads it.
#[derive(Debug, Clone)]
pub struct Sample {
    pub kind: SampleKind,
    /// Identifier of the server, endpoint, or payload size probed.
    pub source: String,
    pub value: f64,
    /// Payload size attempted, throughput samples only.
    pub byte_size: Option<u64>,
    pub outcome: SampleOutcome,
}

impl Sample {
    /// A completed latency probe.
    pub fn latency(kind: SampleKind, source: impl Into<String>, ms: f64) -> Self {
        Self {
            kind,
            source: source.into(),
            value: ms,
            byte_size: None,
            outcome: SampleOutcome::Ok,
        }
    }

    /// A completed throughput measurement.
    pub fn throughput(
        kind: SampleKind,
        source: impl Into<String>,
        mbps: f64,
        byte_size: u64,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            value: mbps,
            byte_size: Some(byte_size),
            outcome: SampleOutcome::Ok,
        }
    }

    /// A failed attempt. The outcome must not be `Ok`.
    pub fn failed(
        kind: SampleKind,
        source: impl Into<String>,
        outcome: SampleOutcome,
    ) -> Self {
        debug_assert!(outcome != SampleOutcome::Ok);
        Self {
            kind,
            source: source.into(),
            value: 0.0,
            byte_size: None,
            outcome,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == SampleOutcome::Ok
    }
}

/// Why a metric value is an estimate rather than a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EstimateReason {
    /// No usable samples at all; a fixed conservative value was substituted.
    NoSamples,
    /// The value was derived from the measured ping via a heuristic curve.
    DerivedFromPing,
}

impl fmt::Display for EstimateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EstimateReason::NoSamples => "no usable samples",
            EstimateReason::DerivedFromPing => "derived from measured ping",
        };
        write!(f, "{}", reason)
    }
}

/// A metric value carrying its provenance.
///
/// The aggregation layer never raises on an empty sample set; instead it
/// produces an `Estimated` value so every run completes with a full result.
/// Keeping the tag lets downstream consumers distinguish a real measurement
/// from a guess instead of conflating the two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Measured(f64),
    Estimated { value: f64, reason: EstimateReason },
    /// Reserved for callers that prefer surfacing a missing metric over an
    /// estimate. The current aggregation policy never constructs it.
    Unavailable,
}

impl MetricValue {
    /// The numeric value, regardless of provenance.
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Measured(v) => Some(*v),
            MetricValue::Estimated { value, .. } => Some(*value),
            MetricValue::Unavailable => None,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, MetricValue::Measured(_))
    }
}

/// One finalized metric, reduced from a set of raw samples.
#[derive(Debug, Clone)]
pub struct AggregatedMetric {
    pub kind: MetricKind,
    pub value: MetricValue,
    /// Number of samples that contributed to the value.
    pub sample_count: usize,
    /// Number of samples excluded (failures and rejected outliers).
    pub rejected_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_sample_is_ok() {
        let sample = Sample::latency(SampleKind::Ping, "probe-a", 12.5);
        assert!(sample.is_ok());
        assert_eq!(sample.byte_size, None);
    }

    #[test]
    fn throughput_sample_carries_byte_size() {
        let sample =
            Sample::throughput(SampleKind::Download, "1000000", 42.0, 1_000_000);
        assert!(sample.is_ok());
        assert_eq!(sample.byte_size, Some(1_000_000));
    }

    #[test]
    fn failed_sample_is_not_ok() {
        let sample = Sample::failed(
            SampleKind::Upload,
            "5000000",
            SampleOutcome::Timeout,
        );
        assert!(!sample.is_ok());
    }

    #[test]
    fn metric_value_accessors() {
        assert_eq!(MetricValue::Measured(10.0).value(), Some(10.0));
        assert!(MetricValue::Measured(10.0).is_measured());

        let estimated = MetricValue::Estimated {
            value: 0.5,
            reason: EstimateReason::DerivedFromPing,
        };
        assert_eq!(estimated.value(), Some(0.5));
        assert!(!estimated.is_measured());

        assert_eq!(MetricValue::Unavailable.value(), None);
    }
}
