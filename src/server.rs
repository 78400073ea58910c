//! The transfer endpoint.
//!
//! One route, `/transfer`, serves three jobs: a JSON-described download of
//! a synthetic payload, a raw octet-stream upload drained through a
//! chunked reader, and a GET capabilities document clients use to
//! self-configure. Handlers hold no cross-request mutable state; the
//! payload cache is built once at startup and shared read-only.

use crate::config::ServerConfig;
use crate::errors::GaugeError;
use crate::payload::PayloadCache;
use crate::transfer::{
    ServerInfo, TransferKind, TransferRequest, UploadReceipt, TRANSFER_PATH,
};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, PRAGMA,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;

/// Upper bound for the JSON request body describing a download.
const MAX_REQUEST_DESCRIPTION_BYTES: usize = 4_096;

/// Floor applied to computed upload speeds, Mbps. Guards against
/// division-by-near-zero durations reporting zero or absurd values.
const MIN_REPORTED_SPEED_MBPS: f64 = 0.1;

/// Shared state injected into request handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    payloads: Arc<PayloadCache>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let payloads =
            PayloadCache::new(config.bounds, &config.preset_sizes);

        Self { config: Arc::new(config), payloads: Arc::new(payloads) }
    }
}

/// Endpoint-side request failure, mapped onto the wire error shape.
#[derive(Debug)]
enum TransferError {
    BadRequest(String),
    UploadTooLarge { limit: u64 },
    Internal(String),
}

impl IntoResponse for TransferError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            TransferError::BadRequest(details) => {
                (StatusCode::BAD_REQUEST, "invalid request", details)
            }
            TransferError::UploadTooLarge { limit } => (
                StatusCode::BAD_REQUEST,
                "upload too large",
                format!("body exceeds the configured ceiling of {} bytes", limit),
            ),
            TransferError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                details,
            ),
        };

        (status, Json(json!({ "error": error, "details": details })))
            .into_response()
    }
}

/// Build the transfer endpoint router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(TRANSFER_PATH, get(capabilities).post(transfer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: ServerConfig) -> Result<(), GaugeError> {
    config.validate()?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        GaugeError::config(format!("failed to bind {}", addr)).with_source(e)
    })?;

    info!("transfer endpoint listening on {}", addr);

    axum::serve(listener, router(AppState::new(config)))
        .await
        .map_err(|e| {
            GaugeError::server("transfer endpoint stopped").with_source(e)
        })
}

/// `GET /transfer`: capabilities and identity, used by clients to
/// self-configure size bounds.
async fn capabilities(State(state): State<AppState>) -> Json<ServerInfo> {
    let version = match option_env!("NETGAUGE_BUILD_GIT_HASH") {
        Some(hash) => format!("{} ({})", env!("CARGO_PKG_VERSION"), hash),
        None => env!("CARGO_PKG_VERSION").to_string(),
    };

    Json(ServerInfo {
        server: state.config.label.clone(),
        version,
        tests: vec![
            "ping".to_string(),
            "download".to_string(),
            "upload".to_string(),
        ],
        min_file_size: state.config.bounds.min,
        max_file_size: state.config.bounds.max,
        max_upload_size: state.config.max_upload_size,
    })
}

/// `POST /transfer`: dispatch on the request content type. A JSON body
/// describes a download; a raw octet-stream body is an upload.
async fn transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, TransferError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        download(&state, body).await
    } else if content_type.starts_with("application/octet-stream") {
        upload(&state, body).await
    } else {
        Err(TransferError::BadRequest(format!(
            "unsupported content type {:?}",
            content_type
        )))
    }
}

async fn download(
    state: &AppState,
    body: Body,
) -> Result<Response, TransferError> {
    let raw = axum::body::to_bytes(body, MAX_REQUEST_DESCRIPTION_BYTES)
        .await
        .map_err(|e| {
            TransferError::BadRequest(format!("unreadable request body: {}", e))
        })?;

    if raw.is_empty() {
        return Err(TransferError::BadRequest(
            "missing request body".to_string(),
        ));
    }

    let request: TransferRequest =
        serde_json::from_slice(&raw).map_err(|e| {
            TransferError::BadRequest(format!("malformed transfer request: {}", e))
        })?;

    // The only JSON-described kind; uploads arrive as octet-stream bodies.
    debug_assert_eq!(request.kind, TransferKind::Download);

    let payload = state.payloads.get(request.size);
    debug!("serving {} byte download", payload.len());

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, payload.len())
        .header(CACHE_CONTROL, "no-store, no-cache, must-revalidate")
        .header(PRAGMA, "no-cache")
        .body(Body::from(payload))
        .map_err(|e| TransferError::Internal(e.to_string()))
}

/// Drain an upload through the chunked streaming reader.
///
/// The body is never buffered whole: a running count is kept and the read
/// aborts as soon as the ceiling is crossed, so an oversized upload cannot
/// exhaust memory. The timing window wraps the entire body transfer.
async fn upload(
    state: &AppState,
    body: Body,
) -> Result<Response, TransferError> {
    let ceiling = state.config.max_upload_size;
    let start = Instant::now();

    let mut received: u64 = 0;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk.map_err(|e| {
            TransferError::BadRequest(format!("interrupted upload body: {}", e))
        })?;

        received += chunk.len() as u64;
        if received > ceiling {
            warn!("upload aborted at {} bytes, ceiling {}", received, ceiling);
            return Err(TransferError::UploadTooLarge { limit: ceiling });
        }
    }

    if received == 0 {
        return Err(TransferError::BadRequest(
            "missing request body".to_string(),
        ));
    }

    let elapsed = start.elapsed();
    let seconds = elapsed.as_secs_f64().max(0.001);
    let speed = ((received as f64 * 8.0) / seconds / 1_000_000.0)
        .max(MIN_REPORTED_SPEED_MBPS);

    debug!("received {} byte upload in {:?}", received, elapsed);

    let receipt = UploadReceipt {
        success: true,
        kind: "upload".to_string(),
        size: received,
        duration: elapsed.as_secs_f64() * 1000.0,
        speed,
    };

    Ok((StatusCode::OK, Json(receipt)).into_response())
}

/// Spawn the endpoint on an ephemeral local port for round-trip tests.
#[cfg(test)]
pub(crate) async fn spawn_for_tests(
    config: ServerConfig,
) -> std::net::SocketAddr {
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router(AppState::new(config))).await.unwrap();
    });

    addr
}

/// Spawn a plain probe target that answers `GET /transfer` after a fixed
/// delay. Loopback responses complete under the ping sanity floor, so
/// latency tests need a target with a realistic round-trip time.
#[cfg(test)]
pub(crate) async fn spawn_probe_for_tests(
    delay: std::time::Duration,
) -> std::net::SocketAddr {
    async fn delayed(
        State(delay): State<std::time::Duration>,
    ) -> &'static str {
        tokio::time::sleep(delay).await;
        "ok"
    }

    let router =
        Router::new().route(TRANSFER_PATH, get(delayed)).with_state(delay);

    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

/// Spawn a variant whose download path paces the body: `chunks` chunks of
/// 1024 bytes with `gap` between them. Headers are sent immediately, so
/// tests can tell body-completion timing apart from header timing.
#[cfg(test)]
pub(crate) async fn spawn_slow_for_tests(
    chunks: usize,
    gap: std::time::Duration,
) -> std::net::SocketAddr {
    use axum::routing::post;

    async fn paced(
        State((chunks, gap)): State<(usize, std::time::Duration)>,
    ) -> Response {
        let stream = futures::stream::unfold(0usize, move |sent| async move {
            if sent >= chunks {
                return None;
            }
            tokio::time::sleep(gap).await;
            let chunk: Result<Bytes, std::io::Error> =
                Ok(Bytes::from(vec![0u8; 1_024]));
            Some((chunk, sent + 1))
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(stream))
            .unwrap()
    }

    let router = Router::new()
        .route(TRANSFER_PATH, post(paced))
        .with_state((chunks, gap));

    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizeBounds;

    fn small_server() -> ServerConfig {
        ServerConfig {
            bounds: SizeBounds::new(1_000, 1_000_000).unwrap(),
            max_upload_size: 1_000_000,
            preset_sizes: vec![100_000],
            ..ServerConfig::default()
        }
    }

    async fn post_download(
        addr: std::net::SocketAddr,
        body: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/transfer", addr))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn download_returns_exactly_the_requested_bytes() {
        let addr = spawn_for_tests(small_server()).await;

        let response =
            post_download(addr, r#"{"type":"download","size":250000}"#).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_LENGTH).unwrap(),
            "250000"
        );

        let cache_control = response
            .headers()
            .get(CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cache_control.contains("no-store"));

        let body = response.bytes().await.unwrap();
        assert_eq!(body.len(), 250_000);
    }

    #[tokio::test]
    async fn download_clamps_out_of_range_sizes() {
        let addr = spawn_for_tests(small_server()).await;

        let response =
            post_download(addr, r#"{"type":"download","size":1}"#).await;
        assert_eq!(response.bytes().await.unwrap().len(), 1_000);

        let response =
            post_download(addr, r#"{"type":"download","size":999999999}"#)
                .await;
        assert_eq!(response.bytes().await.unwrap().len(), 1_000_000);
    }

    #[tokio::test]
    async fn download_rejects_unknown_type_and_missing_body() {
        let addr = spawn_for_tests(small_server()).await;

        let response =
            post_download(addr, r#"{"type":"sideload","size":1000}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: serde_json::Value = response.json().await.unwrap();
        assert_eq!(error["error"], "invalid request");

        let response = post_download(addr, "").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_rejected() {
        let addr = spawn_for_tests(small_server()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/transfer", addr))
            .header("content-type", "text/plain")
            .body("hello")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_acknowledges_with_size_duration_and_speed() {
        let addr = spawn_for_tests(small_server()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/transfer", addr))
            .header("content-type", "application/octet-stream")
            .body(vec![7u8; 500_000])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt: serde_json::Value = response.json().await.unwrap();
        assert_eq!(receipt["success"], true);
        assert_eq!(receipt["type"], "upload");
        assert_eq!(receipt["size"], 500_000);
        assert!(receipt["duration"].as_f64().unwrap() >= 0.0);
        assert!(receipt["speed"].as_f64().unwrap() >= 0.1);
    }

    #[tokio::test]
    async fn upload_over_the_ceiling_aborts_without_buffering() {
        let state = AppState::new(small_server());

        // A body far larger than memory should ever see: 1024 chunks of
        // 64 KB. The reader must abort at the 1 MB ceiling instead of
        // draining the stream.
        let stream = futures::stream::repeat_with(|| {
            Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 64 * 1_024]))
        })
        .take(1_024);

        let result = upload(&state, Body::from_stream(stream)).await;
        match result {
            Err(TransferError::UploadTooLarge { limit }) => {
                assert_eq!(limit, 1_000_000)
            }
            other => panic!("expected ceiling rejection, got {:?}", other),
        }
    }

    #[test]
    fn ceiling_rejection_maps_to_a_descriptive_400() {
        let response =
            TransferError::UploadTooLarge { limit: 5 }.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let addr = spawn_for_tests(small_server()).await;

        let response = reqwest::Client::new()
            .post(format!("http://{}/transfer", addr))
            .header("content-type", "application/octet-stream")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn capabilities_reports_bounds_and_tests() {
        let addr = spawn_for_tests(small_server()).await;

        let info: ServerInfo =
            reqwest::Client::new()
                .get(format!("http://{}/transfer", addr))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();

        assert_eq!(info.min_file_size, 1_000);
        assert_eq!(info.max_file_size, 1_000_000);
        assert_eq!(info.max_upload_size, 1_000_000);
        assert_eq!(
            info.tests,
            vec!["ping".to_string(), "download".to_string(), "upload".to_string()]
        );
    }
}
