//! Connection grading and quality sub-scores.
//!
//! The grade is a pure function of download speed, upload speed, and ping;
//! it can always be recomputed from a stored result and is never persisted
//! independently of its inputs.

use serde::Serialize;
use std::fmt;

/// Ordinal summary of overall connection quality.
///
/// Variants are ordered from worst to best for correct derived Ord behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "F")]
    F,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        };
        write!(f, "{}", label)
    }
}

/// Grade tiers: minimum average speed (Mbps) and maximum ping (ms).
///
/// Both conditions must hold for a tier; the first matching tier in
/// best-to-worst order wins.
const TIERS: &[(Grade, f64, f64)] = &[
    (Grade::APlus, 100.0, 50.0),
    (Grade::A, 50.0, 100.0),
    (Grade::B, 25.0, 150.0),
    (Grade::C, 10.0, 200.0),
    (Grade::D, 5.0, 300.0),
    (Grade::E, 1.0, 500.0),
];

/// Grade a connection from its download speed, upload speed (Mbps), and
/// ping (ms). Total over all inputs; anything below the E tier is an F.
pub fn grade(download_mbps: f64, upload_mbps: f64, ping_ms: f64) -> Grade {
    let avg = (download_mbps + upload_mbps) / 2.0;

    for &(tier, min_avg, max_ping) in TIERS {
        if avg >= min_avg && ping_ms <= max_ping {
            return tier;
        }
    }

    Grade::F
}

/// Derived quality sub-scores, each in [0, 100].
///
/// Recomputed on demand from a finished result; not part of grading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkQualityScore {
    /// How steady the connection is, penalized by jitter.
    pub stability: f64,
    /// How balanced upload is against download.
    pub consistency: f64,
    /// How responsive the connection is, penalized by ping.
    pub reliability: f64,
}

impl NetworkQualityScore {
    pub fn from_metrics(
        download_mbps: f64,
        upload_mbps: f64,
        ping_ms: f64,
        jitter_ms: f64,
    ) -> Self {
        let stability = (100.0 - jitter_ms * 2.0).clamp(0.0, 100.0);

        let consistency = if download_mbps > 0.0 {
            ((upload_mbps / download_mbps) * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let reliability = (100.0 - ping_ms / 5.0).clamp(0.0, 100.0);

        Self { stability, consistency, reliability }
    }
}
