//! Timed HTTP exchanges.
//!
//! The measurement boundary is precise: the clock starts when the request
//! is dispatched and stops when the full response body has been read, never
//! when headers arrive. Timing only headers grossly understates transfer
//! time for large payloads, so every exchange here drains the body through
//! the chunked reader before the clock stops.

use crate::errors::GaugeError;
use crate::transfer::{CancelFlag, ServerInfo, TransferKind, TransferRequest, TRANSFER_PATH};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, PRAGMA};
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One completed timed exchange.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wall-clock time from dispatch to full-body completion.
    pub elapsed: Duration,
    /// Bytes transferred in the measured direction.
    pub bytes: u64,
}

/// Failure of a timed exchange.
#[derive(Debug)]
pub enum TimerError {
    /// The exchange exceeded its time budget.
    Timeout,
    /// Connection-level failure: refused, reset, DNS, TLS.
    Transport(reqwest::Error),
    /// The endpoint answered with a non-success status. Treated like a
    /// transport failure by the collector.
    Server(StatusCode),
    /// The run's cancellation flag was raised mid-exchange.
    Cancelled,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::Timeout => write!(f, "exchange timed out"),
            TimerError::Transport(e) => write!(f, "transport failure: {}", e),
            TimerError::Server(status) => {
                write!(f, "endpoint returned status: {}", status)
            }
            TimerError::Cancelled => write!(f, "exchange cancelled"),
        }
    }
}

impl Error for TimerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TimerError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TimerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TimerError::Timeout
        } else {
            TimerError::Transport(error)
        }
    }
}

impl TimerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimerError::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TimerError::Cancelled)
    }
}

/// Executes timed request/response exchanges against probe targets and the
/// transfer endpoint.
pub struct TransferTimer {
    client: Client,
    probe_timeout: Duration,
    bulk_timeout: Duration,
}

impl TransferTimer {
    /// Build a timer whose requests carry explicit no-cache directives, so
    /// repeated measurements are never satisfied from a cache.
    pub fn new(
        probe_timeout: Duration,
        bulk_timeout: Duration,
    ) -> Result<Self, GaugeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| {
                GaugeError::network("failed to construct HTTP client")
                    .with_source(e)
            })?;

        Ok(Self { client, probe_timeout, bulk_timeout })
    }

    /// Minimal latency probe: GET the target and drain whatever body it
    /// returns. The elapsed time approximates one request/response RTT.
    pub async fn probe(
        &self,
        url: &str,
        cancel: &CancelFlag,
    ) -> Result<Timing, TimerError> {
        debug!("probing {}", url);
        self.timed_exchange(self.client.get(url), self.probe_timeout, cancel)
            .await
    }

    /// Timed download: POST a JSON transfer description and drain the
    /// octet-stream response.
    pub async fn download(
        &self,
        base_url: &str,
        size: u64,
        cancel: &CancelFlag,
    ) -> Result<Timing, TimerError> {
        debug!("downloading {} bytes from {}", size, base_url);
        let request = self
            .client
            .post(endpoint(base_url))
            .json(&TransferRequest { kind: TransferKind::Download, size });

        self.timed_exchange(request, self.bulk_timeout, cancel).await
    }

    /// Timed upload: POST a raw binary body and wait for the full
    /// acknowledgment. The reported byte count is the uploaded payload
    /// size, not the acknowledgment size.
    pub async fn upload(
        &self,
        base_url: &str,
        payload: Bytes,
        cancel: &CancelFlag,
    ) -> Result<Timing, TimerError> {
        let payload_len = payload.len() as u64;
        debug!("uploading {} bytes to {}", payload_len, base_url);

        let request = self
            .client
            .post(endpoint(base_url))
            .header("content-type", "application/octet-stream")
            .body(payload);

        let timing =
            self.timed_exchange(request, self.bulk_timeout, cancel).await?;

        Ok(Timing { elapsed: timing.elapsed, bytes: payload_len })
    }

    /// Fetch the capabilities document, used to self-configure size bounds
    /// and learn the server identity. Not a timed measurement.
    pub async fn server_info(
        &self,
        base_url: &str,
    ) -> Result<ServerInfo, TimerError> {
        let response = self
            .client
            .get(endpoint(base_url))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TimerError::Server(response.status()));
        }

        Ok(response.json::<ServerInfo>().await?)
    }

    async fn timed_exchange(
        &self,
        request: RequestBuilder,
        limit: Duration,
        cancel: &CancelFlag,
    ) -> Result<Timing, TimerError> {
        let start = Instant::now();

        let exchange = async {
            let mut response = request.send().await?;

            if !response.status().is_success() {
                return Err(TimerError::Server(response.status()));
            }

            let mut bytes: u64 = 0;
            while let Some(chunk) = response.chunk().await? {
                bytes += chunk.len() as u64;

                if cancel.is_cancelled() {
                    return Err(TimerError::Cancelled);
                }
            }

            Ok(bytes)
        };

        match tokio::time::timeout(limit, exchange).await {
            Ok(Ok(bytes)) => Ok(Timing { elapsed: start.elapsed(), bytes }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TimerError::Timeout),
        }
    }
}

fn endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), TRANSFER_PATH)
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

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("http://localhost:3210/"),
            "http://localhost:3210/transfer"
        );
        assert_eq!(
            endpoint("http://localhost:3210"),
            "http://localhost:3210/transfer"
        );
    }

    #[tokio::test]
    async fn download_times_the_full_body_not_the_headers() {
        // The test endpoint trickles the body: 4 chunks spaced 50ms apart.
        // Headers arrive almost immediately, so an elapsed time at or above
        // the total pacing proves the clock stops on body completion.
        let addr = server::spawn_slow_for_tests(4, Duration::from_millis(50))
            .await;
        let base = format!("http://{}", addr);

        let timing = timer()
            .download(&base, 4 * 1_024, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(timing.bytes, 4 * 1_024);
        assert!(
            timing.elapsed >= Duration::from_millis(150),
            "elapsed {:?} too short to have covered the paced body",
            timing.elapsed
        );
    }

    #[tokio::test]
    async fn download_reports_exact_byte_count() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let base = format!("http://{}", addr);

        let timing = timer()
            .download(&base, 250_000, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(timing.bytes, 250_000);
    }

    #[tokio::test]
    async fn upload_reports_payload_size() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let base = format!("http://{}", addr);

        let payload = Bytes::from(vec![7u8; 100_000]);
        let timing =
            timer().upload(&base, payload, &CancelFlag::new()).await.unwrap();
        assert_eq!(timing.bytes, 100_000);
    }

    #[tokio::test]
    async fn unreachable_target_is_a_transport_error() {
        // Port 1 is essentially never listening.
        let result = timer()
            .probe("http://127.0.0.1:1/", &CancelFlag::new())
            .await;

        match result {
            Err(TimerError::Transport(_)) | Err(TimerError::Timeout) => {}
            other => panic!("expected transport failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn slow_exchange_times_out() {
        let addr = server::spawn_slow_for_tests(10, Duration::from_millis(200))
            .await;
        let base = format!("http://{}", addr);

        let tight = TransferTimer::new(
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
        .unwrap();

        let result =
            tight.download(&base, 10 * 1_024, &CancelFlag::new()).await;
        assert!(matches!(result, Err(TimerError::Timeout)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_streaming_body() {
        let addr = server::spawn_slow_for_tests(20, Duration::from_millis(50))
            .await;
        let base = format!("http://{}", addr);

        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = timer().download(&base, 20 * 1_024, &cancel).await;
        assert!(matches!(result, Err(TimerError::Cancelled)));
    }

    #[tokio::test]
    async fn server_info_round_trip() {
        let addr = server::spawn_for_tests(ServerConfig::default()).await;
        let base = format!("http://{}", addr);

        let info = timer().server_info(&base).await.unwrap();
        assert!(info.tests.contains(&"download".to_string()));
        assert!(info.min_file_size <= info.max_file_size);
    }
}
