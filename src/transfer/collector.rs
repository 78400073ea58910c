//! Sequential sample collection.
//!
//! One metric at a time, one target at a time. Probing targets
//! concurrently would contend for the same bandwidth and bias throughput
//! downward in ways that cannot be separated from genuine slowness, so the
//! collector never overlaps attempts. A failing target becomes a non-ok
//! sample and the sweep continues; one bad server or size never aborts a
//! test.

use crate::payload;
use crate::sample::{Sample, SampleKind, SampleOutcome};
use crate::stats::megabits_per_second;
use crate::transfer::timer::{TimerError, TransferTimer};
use crate::transfer::CancelFlag;
use crate::config::SizeBounds;
use log::{debug, warn};
use std::time::Duration;

/// Completed latency probes below this are clock glitches, not RTTs.
pub const PING_FLOOR_MS: f64 = 1.0;
/// Completed latency probes above this are treated as anomalies.
pub const PING_CEILING_MS: f64 = 1_000.0;

/// Pause between repeated probes to the same target, so the jitter
/// sequence measures network variance rather than queuing artifacts from a
/// tight request loop.
const JITTER_PROBE_GAP: Duration = Duration::from_millis(50);

/// Collects raw samples for one metric kind across an ordered target list.
pub struct SampleCollector<'a> {
    timer: &'a TransferTimer,
    cancel: &'a CancelFlag,
}

impl<'a> SampleCollector<'a> {
    pub fn new(timer: &'a TransferTimer, cancel: &'a CancelFlag) -> Self {
        Self { timer, cancel }
    }

    /// Probe each server `per_server` times, in order.
    ///
    /// Structurally successful probes outside the sanity window are marked
    /// as rejected outliers rather than ok.
    pub async fn collect_ping(
        &self,
        servers: &[String],
        per_server: usize,
        mut on_attempt: impl FnMut(usize, usize),
    ) -> Vec<Sample> {
        let total = servers.len() * per_server;
        let mut samples = Vec::with_capacity(total);

        'sweep: for server in servers {
            for _ in 0..per_server {
                if self.cancel.is_cancelled() {
                    break 'sweep;
                }

                samples.push(self.ping_once(SampleKind::Ping, server).await);
                on_attempt(samples.len(), total);
            }
        }

        samples
    }

    /// Probe one target repeatedly, preserving order, with a small fixed
    /// gap between attempts. The aggregation reads consecutive
    /// differences, so ordering is part of the contract.
    pub async fn collect_jitter(
        &self,
        server: &str,
        count: usize,
        mut on_attempt: impl FnMut(usize, usize),
    ) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(count);

        for i in 0..count {
            if self.cancel.is_cancelled() {
                break;
            }

            if i > 0 {
                tokio::time::sleep(JITTER_PROBE_GAP).await;
            }

            samples.push(self.ping_once(SampleKind::JitterTick, server).await);
            on_attempt(samples.len(), count);
        }

        samples
    }

    /// One timed download per payload size, in the given order.
    pub async fn collect_download(
        &self,
        base_url: &str,
        sizes: &[u64],
        mut on_attempt: impl FnMut(usize, usize),
    ) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(sizes.len());

        for (done, &size) in sizes.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let source = size.to_string();
            let sample = match self.timer.download(base_url, size, self.cancel).await
            {
                Ok(timing) => {
                    let mbps = megabits_per_second(timing.bytes, timing.elapsed);
                    debug!("download {}B: {:.2} Mbps", timing.bytes, mbps);
                    Sample::throughput(SampleKind::Download, source, mbps, size)
                }
                Err(error) => {
                    self.failed(SampleKind::Download, source, error, "download")
                }
            };

            samples.push(sample);
            on_attempt(done + 1, sizes.len());
        }

        samples
    }

    /// One timed upload per payload size, in the given order. Payloads are
    /// generated locally with the same tile-fill generator the endpoint
    /// uses.
    pub async fn collect_upload(
        &self,
        base_url: &str,
        sizes: &[u64],
        bounds: &SizeBounds,
        mut on_attempt: impl FnMut(usize, usize),
    ) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(sizes.len());

        for (done, &size) in sizes.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            let source = size.to_string();
            let body = payload::generate(size, bounds);
            let sample = match self.timer.upload(base_url, body, self.cancel).await
            {
                Ok(timing) => {
                    let mbps = megabits_per_second(timing.bytes, timing.elapsed);
                    debug!("upload {}B: {:.2} Mbps", timing.bytes, mbps);
                    Sample::throughput(SampleKind::Upload, source, mbps, size)
                }
                Err(error) => {
                    self.failed(SampleKind::Upload, source, error, "upload")
                }
            };

            samples.push(sample);
            on_attempt(done + 1, sizes.len());
        }

        samples
    }

    async fn ping_once(&self, kind: SampleKind, server: &str) -> Sample {
        match self.timer.probe(server, self.cancel).await {
            Ok(timing) => {
                let ms = timing.elapsed.as_secs_f64() * 1000.0;

                if !(PING_FLOOR_MS..=PING_CEILING_MS).contains(&ms) {
                    debug!("probe of {} outside sanity window: {:.2} ms", server, ms);
                    return Sample::failed(
                        kind,
                        server,
                        SampleOutcome::RejectedOutlier,
                    );
                }

                Sample::latency(kind, server, ms)
            }
            Err(error) => self.failed(kind, server.to_string(), error, "probe"),
        }
    }

    fn failed(
        &self,
        kind: SampleKind,
        source: String,
        error: TimerError,
        what: &str,
    ) -> Sample {
        let outcome = if error.is_timeout() {
            SampleOutcome::Timeout
        } else {
            SampleOutcome::TransportError
        };

        if !error.is_cancelled() {
            warn!("{} of {} failed: {}", what, source, error);
        }

        Sample::failed(kind, source, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::server;
    use std::time::Duration;

    fn timer() -> TransferTimer {
        TransferTimer::new(Duration::from_secs(3), Duration::from_secs(30))
            .unwrap()
    }

    #[tokio::test]
    async fn ping_sweep_survives_one_unreachable_server() {
        let addr =
            server::spawn_probe_for_tests(Duration::from_millis(5)).await;
        let good = format!("http://{}/transfer", addr);

        let servers = vec![
            good.clone(),
            good.clone(),
            // Nothing listens on port 1.
            "http://127.0.0.1:1/".to_string(),
            good,
        ];

        let timer = timer();
        let cancel = CancelFlag::new();
        let collector = SampleCollector::new(&timer, &cancel);

        let samples = collector.collect_ping(&servers, 1, |_, _| {}).await;
        assert_eq!(samples.len(), 4);

        let failed: Vec<_> =
            samples.iter().filter(|s| !s.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].outcome, SampleOutcome::TransportError);

        let metric = crate::aggregate::ping_trimmed(&samples);
        assert!(metric.value.is_measured());
        assert_eq!(metric.rejected_count, 1);
    }

    #[tokio::test]
    async fn jitter_sweep_keeps_probe_order_and_count() {
        let addr =
            server::spawn_probe_for_tests(Duration::from_millis(5)).await;
        let target = format!("http://{}/transfer", addr);

        let timer = timer();
        let cancel = CancelFlag::new();
        let collector = SampleCollector::new(&timer, &cancel);

        let mut ticks = 0;
        let samples = collector
            .collect_jitter(&target, 5, |done, total| {
                ticks += 1;
                assert_eq!(done, ticks);
                assert_eq!(total, 5);
            })
            .await;

        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.kind == SampleKind::JitterTick));
    }

    #[tokio::test]
    async fn download_sweep_produces_one_sample_per_size() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let base = format!("http://{}", addr);

        let timer = timer();
        let cancel = CancelFlag::new();
        let collector = SampleCollector::new(&timer, &cancel);

        let sizes = vec![50_000, 250_000];
        let samples =
            collector.collect_download(&base, &sizes, |_, _| {}).await;

        assert_eq!(samples.len(), 2);
        for (sample, size) in samples.iter().zip(&sizes) {
            assert!(sample.is_ok());
            assert_eq!(sample.byte_size, Some(*size));
            assert!(sample.value > 0.0);
        }
    }

    #[tokio::test]
    async fn upload_sweep_produces_one_sample_per_size() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let base = format!("http://{}", addr);

        let timer = timer();
        let cancel = CancelFlag::new();
        let collector = SampleCollector::new(&timer, &cancel);

        let bounds = SizeBounds::default();
        let sizes = vec![50_000, 250_000];
        let samples = collector
            .collect_upload(&base, &sizes, &bounds, |_, _| {})
            .await;

        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.is_ok()));
    }

    #[tokio::test]
    async fn cancellation_stops_remaining_targets_immediately() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let target = format!("http://{}/transfer", addr);
        let servers = vec![target.clone(), target.clone(), target];

        let timer = timer();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let collector = SampleCollector::new(&timer, &cancel);

        let samples = collector.collect_ping(&servers, 2, |_, _| {}).await;
        assert!(samples.is_empty());
    }
}
