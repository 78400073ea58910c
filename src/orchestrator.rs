//! Test-run orchestration.
//!
//! One run walks a fixed state machine: ping, jitter, download, upload,
//! grading. Later metrics never influence earlier ones; the only reverse
//! dependency is the documented fallback estimation when a metric has no
//! usable samples. Progress is pushed over a channel as monotonically
//! non-decreasing values on a fixed schedule, so a caller can render a
//! progress bar without knowing metric internals.

use crate::aggregate;
use crate::config::{ClientConfig, SizeBounds};
use crate::errors::GaugeError;
use crate::results::SpeedTestResult;
use crate::sample::MetricKind;
use crate::transfer::collector::SampleCollector;
use crate::transfer::timer::TransferTimer;
use crate::transfer::CancelFlag;
use log::{info, warn};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

/// States of one test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Pinging,
    MeasuringJitter,
    Downloading,
    Uploading,
    Grading,
    Complete,
    /// Reachable only through a programming error; every metric-level
    /// failure is absorbed by the fallback policy instead.
    Failed,
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestPhase::Idle => "idle",
            TestPhase::Pinging => "pinging",
            TestPhase::MeasuringJitter => "measuring jitter",
            TestPhase::Downloading => "downloading",
            TestPhase::Uploading => "uploading",
            TestPhase::Grading => "grading",
            TestPhase::Complete => "complete",
            TestPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// One progress tick.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub phase: TestPhase,
    pub percent: u8,
}

/// Fixed progress schedule: (phase start, phase end) in [0, 100].
const PING_SPAN: (u8, u8) = (0, 15);
const JITTER_SPAN: (u8, u8) = (15, 25);
const DOWNLOAD_SPAN: (u8, u8) = (25, 65);
const UPLOAD_SPAN: (u8, u8) = (65, 90);
const GRADING_SPAN: (u8, u8) = (90, 100);

/// Drives one complete speed test.
pub struct Orchestrator {
    config: ClientConfig,
    timer: TransferTimer,
    cancel: CancelFlag,
    phase: TestPhase,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Result<Self, GaugeError> {
        config.validate()?;

        let timer = TransferTimer::new(
            Duration::from_millis(config.probe_timeout_ms),
            Duration::from_millis(config.timeout_ms),
        )?;

        Ok(Self { config, timer, cancel: CancelFlag::new(), phase: TestPhase::Idle })
    }

    /// Flag that aborts this run when raised. Clones observe the same run.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn phase(&self) -> TestPhase {
        self.phase
    }

    /// Run the full sequence and assemble one immutable result.
    ///
    /// On cancellation the orchestrator returns to `Idle` and discards all
    /// partial measurements; a cancelled run never surfaces a result.
    pub async fn run(
        &mut self,
        progress: &UnboundedSender<Progress>,
    ) -> Result<SpeedTestResult, GaugeError> {
        let started = Instant::now();
        let mut tracker = ProgressTracker::new(progress);

        let cancel = self.cancel.clone();
        let collector = SampleCollector::new(&self.timer, &cancel);

        // Ping. The capabilities document, when reachable, supplies the
        // server identity and the size bounds to clamp transfers into.
        self.phase = TestPhase::Pinging;
        tracker.emit(TestPhase::Pinging, PING_SPAN.0);

        let (server_label, bounds) = self.self_configure().await;
        let ping_servers = self.config.effective_ping_servers();

        let ping_samples = if self.out_of_time(started) {
            Vec::new()
        } else {
            collector
                .collect_ping(
                    &ping_servers,
                    self.config.ping_measurements,
                    tracker.span_callback(TestPhase::Pinging, PING_SPAN),
                )
                .await
        };
        abort_if_cancelled(&cancel, &mut self.phase)?;

        let ping = if ping_servers.len() > 1 {
            aggregate::ping_trimmed(&ping_samples)
        } else {
            aggregate::ping_best(&ping_samples)
        };
        let ping_hint = ping.value.value();
        info!("ping: {:?} ({} samples)", ping.value, ping.sample_count);

        // Jitter, against the first probe target.
        self.phase = TestPhase::MeasuringJitter;
        tracker.emit(TestPhase::MeasuringJitter, JITTER_SPAN.0);

        let jitter_samples = if self.out_of_time(started) {
            Vec::new()
        } else {
            collector
                .collect_jitter(
                    &ping_servers[0],
                    self.config.jitter_measurements,
                    tracker.span_callback(TestPhase::MeasuringJitter, JITTER_SPAN),
                )
                .await
        };
        abort_if_cancelled(&cancel, &mut self.phase)?;

        let jitter = aggregate::jitter(&jitter_samples, ping_hint);
        info!("jitter: {:?} ({} samples)", jitter.value, jitter.sample_count);

        // Download.
        self.phase = TestPhase::Downloading;
        tracker.emit(TestPhase::Downloading, DOWNLOAD_SPAN.0);

        let download_sizes = clamp_sizes(&self.config.download_sizes, &bounds);
        let download_samples = if self.out_of_time(started) {
            Vec::new()
        } else {
            collector
                .collect_download(
                    &self.config.server,
                    &download_sizes,
                    tracker.span_callback(TestPhase::Downloading, DOWNLOAD_SPAN),
                )
                .await
        };
        abort_if_cancelled(&cancel, &mut self.phase)?;

        let download =
            aggregate::throughput(MetricKind::Download, &download_samples, ping_hint);
        info!(
            "download: {:?} ({} samples)",
            download.value, download.sample_count
        );

        // Upload.
        self.phase = TestPhase::Uploading;
        tracker.emit(TestPhase::Uploading, UPLOAD_SPAN.0);

        let upload_sizes = clamp_sizes(&self.config.upload_sizes, &bounds);
        let upload_samples = if self.out_of_time(started) {
            Vec::new()
        } else {
            collector
                .collect_upload(
                    &self.config.server,
                    &upload_sizes,
                    &bounds,
                    tracker.span_callback(TestPhase::Uploading, UPLOAD_SPAN),
                )
                .await
        };
        abort_if_cancelled(&cancel, &mut self.phase)?;

        let upload =
            aggregate::throughput(MetricKind::Upload, &upload_samples, ping_hint);
        info!("upload: {:?} ({} samples)", upload.value, upload.sample_count);

        // Grading and assembly.
        self.phase = TestPhase::Grading;
        tracker.emit(TestPhase::Grading, GRADING_SPAN.0);

        let result = SpeedTestResult::assemble(
            server_label,
            self.config.client_identity.clone(),
            &ping,
            &jitter,
            &download,
            &upload,
        );

        self.phase = TestPhase::Complete;
        tracker.emit(TestPhase::Complete, GRADING_SPAN.1);

        info!(
            "test complete: {:.2}/{:.2} Mbps, {:.1} ms ping, grade {}",
            result.download_mbps, result.upload_mbps, result.ping_ms, result.grade
        );

        Ok(result)
    }

    /// Fetch the capabilities document and derive the server label and the
    /// effective size bounds. Falls back to local configuration when the
    /// endpoint has no capabilities to offer.
    async fn self_configure(&self) -> (String, SizeBounds) {
        match self.timer.server_info(&self.config.server).await {
            Ok(info) => {
                let bounds =
                    SizeBounds::new(info.min_file_size, info.max_file_size)
                        .unwrap_or(self.config.bounds);
                (info.server, bounds)
            }
            Err(error) => {
                warn!("capabilities unavailable, using local config: {}", error);
                (self.config.server.clone(), self.config.bounds)
            }
        }
    }

    fn out_of_time(&self, started: Instant) -> bool {
        let Some(deadline_ms) = self.config.overall_deadline_ms else {
            return false;
        };

        let exhausted =
            started.elapsed() >= Duration::from_millis(deadline_ms);
        if exhausted {
            warn!("run deadline exhausted, remaining metrics will be estimated");
        }

        exhausted
    }
}

/// Keeps emitted progress non-decreasing across phase spans.
struct ProgressTracker<'a> {
    tx: &'a UnboundedSender<Progress>,
    last: u8,
    primed: bool,
}

impl<'a> ProgressTracker<'a> {
    fn new(tx: &'a UnboundedSender<Progress>) -> Self {
        Self { tx, last: 0, primed: false }
    }

    fn emit(&mut self, phase: TestPhase, percent: u8) {
        // Never runs backwards; equal values are allowed at span
        // boundaries so every phase transition stays visible.
        if self.primed && percent < self.last {
            return;
        }

        self.primed = true;
        self.last = percent;
        let _ = self.tx.send(Progress { phase, percent });
    }

    /// Per-attempt callback interpolating across one phase's span.
    fn span_callback(
        &mut self,
        phase: TestPhase,
        span: (u8, u8),
    ) -> impl FnMut(usize, usize) + '_ + use<'_, 'a> {
        move |done, total| {
            let width = (span.1 - span.0) as f64;
            let fraction = done as f64 / total.max(1) as f64;
            let percent = span.0 + (width * fraction) as u8;
            self.emit(phase, percent.min(span.1));
        }
    }
}

/// Abort the run when its cancellation flag is raised: back to `Idle`,
/// partial measurements discarded.
fn abort_if_cancelled(
    cancel: &CancelFlag,
    phase: &mut TestPhase,
) -> Result<(), GaugeError> {
    if cancel.is_cancelled() {
        info!("run cancelled, discarding partial measurements");
        *phase = TestPhase::Idle;
        return Err(GaugeError::cancelled());
    }

    Ok(())
}

fn clamp_sizes(sizes: &[u64], bounds: &SizeBounds) -> Vec<u64> {
    let mut clamped: Vec<u64> =
        sizes.iter().map(|&size| bounds.clamp(size)).collect();
    clamped.dedup();
    clamped
}
