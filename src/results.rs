//! Final result record for a completed test run.

use crate::grading::{Grade, NetworkQualityScore};
use crate::sample::{AggregatedMetric, MetricValue};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Provenance of one reported metric, preserved so downstream consumers
/// can distinguish a real measurement from a fallback estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Measured,
    Estimated { reason: String },
    Unavailable,
}

impl From<&MetricValue> for Provenance {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Measured(_) => Provenance::Measured,
            MetricValue::Estimated { reason, .. } => {
                Provenance::Estimated { reason: reason.to_string() }
            }
            MetricValue::Unavailable => Provenance::Unavailable,
        }
    }
}

/// Per-metric provenance tags for one result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultProvenance {
    pub download: Provenance,
    pub upload: Provenance,
    pub ping: Provenance,
    pub jitter: Provenance,
}

impl ResultProvenance {
    pub fn all_measured(&self) -> bool {
        [&self.download, &self.upload, &self.ping, &self.jitter]
            .iter()
            .all(|p| **p == Provenance::Measured)
    }
}

/// One completed test run. Immutable once created; handed to the history
/// collaborator for persistence.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedTestResult {
    pub timestamp: DateTime<Utc>,
    /// Identity of the transfer endpoint, as reported by its capabilities
    /// document (or its URL when capabilities were unavailable).
    pub server_label: String,
    /// Opaque client identifier supplied by an external collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_identity: Option<String>,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub grade: Grade,
    pub provenance: ResultProvenance,
}

impl SpeedTestResult {
    /// Assemble a result from the four finalized metrics.
    ///
    /// The grade is recomputed from download, upload, and ping; it is never
    /// stored independently of its inputs.
    pub fn assemble(
        server_label: String,
        client_identity: Option<String>,
        ping: &AggregatedMetric,
        jitter: &AggregatedMetric,
        download: &AggregatedMetric,
        upload: &AggregatedMetric,
    ) -> Self {
        let ping_ms = ping.value.value().unwrap_or(0.0);
        let jitter_ms = jitter.value.value().unwrap_or(0.0);
        let download_mbps = download.value.value().unwrap_or(0.0);
        let upload_mbps = upload.value.value().unwrap_or(0.0);

        Self {
            timestamp: Utc::now(),
            server_label,
            client_identity,
            download_mbps,
            upload_mbps,
            ping_ms,
            jitter_ms,
            grade: crate::grading::grade(download_mbps, upload_mbps, ping_ms),
            provenance: ResultProvenance {
                download: (&download.value).into(),
                upload: (&upload.value).into(),
                ping: (&ping.value).into(),
                jitter: (&jitter.value).into(),
            },
        }
    }

    /// Derived quality sub-scores, recomputed on demand.
    pub fn quality(&self) -> NetworkQualityScore {
        NetworkQualityScore::from_metrics(
            self.download_mbps,
            self.upload_mbps,
            self.ping_ms,
            self.jitter_ms,
        )
    }
}
