//! Configuration for the measurement engine and the transfer endpoint.
//!
//! Values come from CLI flags with environment-variable fallbacks; anything
//! malformed is fatal at startup rather than recoverable per request.

use crate::errors::GaugeError;
use url::Url;

/// Default lower clamp bound for transfer sizes: 1 KB.
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1_024;
/// Default upper clamp bound for transfer sizes: 100 MB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000_000;
/// Default per-attempt timeout for bulk transfers.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default per-attempt timeout for ping-class probes.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
/// Default hard ceiling for a single upload body: 50 MB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50_000_000;

/// Clamp bounds for transfer payload sizes.
#[derive(Debug, Clone, Copy)]
pub struct SizeBounds {
    pub min: u64,
    pub max: u64,
}

impl SizeBounds {
    pub fn new(min: u64, max: u64) -> Result<Self, GaugeError> {
        if min == 0 {
            return Err(GaugeError::config("minFileSize must be positive"));
        }
        if min > max {
            return Err(GaugeError::config(format!(
                "minFileSize ({}) exceeds maxFileSize ({})",
                min, max
            )));
        }

        Ok(Self { min, max })
    }

    /// Clamp a requested size into bounds. Out-of-range requests are served
    /// with the nearest bound, never rejected.
    pub fn clamp(&self, size: u64) -> u64 {
        size.clamp(self.min, self.max)
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self { min: DEFAULT_MIN_FILE_SIZE, max: DEFAULT_MAX_FILE_SIZE }
    }
}

/// Configuration for one test run.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the transfer endpoint.
    pub server: String,
    /// Ordered list of external probe targets for latency measurement.
    pub ping_servers: Vec<String>,
    /// Probes per ping server.
    pub ping_measurements: usize,
    /// Probes in the jitter sequence.
    pub jitter_measurements: usize,
    /// Payload sizes for download measurements, ascending.
    pub download_sizes: Vec<u64>,
    /// Payload sizes for upload measurements, ascending.
    pub upload_sizes: Vec<u64>,
    /// Per-attempt timeout for bulk transfers, milliseconds.
    pub timeout_ms: u64,
    /// Per-attempt timeout for ping-class probes, milliseconds.
    pub probe_timeout_ms: u64,
    /// Optional budget for the whole run, milliseconds. When exhausted,
    /// remaining metrics fall back to estimates instead of probing further.
    pub overall_deadline_ms: Option<u64>,
    /// Clamp bounds applied to generated upload payloads.
    pub bounds: SizeBounds,
    /// Opaque client identifier attached to results, supplied externally.
    pub client_identity: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "http://localhost:3210".to_string(),
            ping_servers: Vec::new(),
            ping_measurements: 3,
            jitter_measurements: 10,
            download_sizes: vec![100_000, 1_000_000, 10_000_000, 25_000_000],
            upload_sizes: vec![100_000, 1_000_000, 5_000_000, 10_000_000],
            timeout_ms: DEFAULT_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            overall_deadline_ms: None,
            bounds: SizeBounds::default(),
            client_identity: None,
        }
    }
}

impl ClientConfig {
    /// Ping servers to probe: the configured list, or the transfer endpoint
    /// itself when none are configured.
    pub fn effective_ping_servers(&self) -> Vec<String> {
        if self.ping_servers.is_empty() {
            vec![format!(
                "{}{}",
                self.server.trim_end_matches('/'),
                crate::transfer::TRANSFER_PATH
            )]
        } else {
            self.ping_servers.clone()
        }
    }

    pub fn validate(&self) -> Result<(), GaugeError> {
        Url::parse(&self.server).map_err(|e| {
            GaugeError::config(format!("invalid server URL {:?}: {}", self.server, e))
        })?;

        for target in &self.ping_servers {
            Url::parse(target).map_err(|e| {
                GaugeError::config(format!(
                    "invalid ping server URL {:?}: {}",
                    target, e
                ))
            })?;
        }

        if self.ping_measurements == 0 {
            return Err(GaugeError::config("pingMeasurements must be positive"));
        }
        if self.jitter_measurements < 2 {
            return Err(GaugeError::config(
                "jitterMeasurements must be at least 2",
            ));
        }
        if self.download_sizes.is_empty() || self.upload_sizes.is_empty() {
            return Err(GaugeError::config(
                "at least one transfer size is required per direction",
            ));
        }
        if self.timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(GaugeError::config("timeoutMs must be positive"));
        }

        Ok(())
    }
}

/// Configuration for the transfer endpoint.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bounds: SizeBounds,
    /// Hard ceiling for a single upload body, bytes.
    pub max_upload_size: u64,
    /// Identity reported by the capabilities endpoint.
    pub label: String,
    /// Payload sizes pre-generated at startup.
    pub preset_sizes: Vec<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3210,
            bounds: SizeBounds::default(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            label: format!("netgauge/{}", env!("CARGO_PKG_VERSION")),
            preset_sizes: vec![100_000, 1_000_000, 10_000_000, 25_000_000],
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), GaugeError> {
        if self.max_upload_size == 0 {
            return Err(GaugeError::config("maxUploadSize must be positive"));
        }

        Ok(())
    }
}

/// Parse a comma-separated list of probe target URLs.
pub fn parse_ping_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_clamp() {
        let bounds = SizeBounds::new(1_000, 10_000).unwrap();
        assert_eq!(bounds.clamp(5), 1_000);
        assert_eq!(bounds.clamp(5_000), 5_000);
        assert_eq!(bounds.clamp(50_000), 10_000);
    }

    #[test]
    fn bounds_reject_inverted() {
        assert!(SizeBounds::new(10_000, 1_000).is_err());
        assert!(SizeBounds::new(0, 1_000).is_err());
    }

    #[test]
    fn client_config_default_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn client_config_rejects_bad_server_url() {
        let config = ClientConfig {
            server: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_config_rejects_single_jitter_probe() {
        let config =
            ClientConfig { jitter_measurements: 1, ..ClientConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_ping_servers_falls_back_to_endpoint() {
        let config = ClientConfig::default();
        assert_eq!(
            config.effective_ping_servers(),
            vec![format!("{}/transfer", config.server)]
        );

        let config = ClientConfig {
            ping_servers: vec!["http://probe-a.example".to_string()],
            ..ClientConfig::default()
        };
        assert_eq!(
            config.effective_ping_servers(),
            vec!["http://probe-a.example".to_string()]
        );
    }

    #[test]
    fn parse_ping_servers_splits_and_trims() {
        let servers =
            parse_ping_servers("http://a.example, http://b.example ,,");
        assert_eq!(
            servers,
            vec!["http://a.example".to_string(), "http://b.example".to_string()]
        );
    }
}
