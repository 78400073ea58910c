//! Wire protocol shared by the measurement client and the transfer
//! endpoint, plus the cancellation primitive threaded through a run.

pub mod collector;
pub mod timer;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Path of the transfer endpoint, relative to the server base URL.
pub const TRANSFER_PATH: &str = "/transfer";

/// Body of a JSON-described download request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "type")]
    pub kind: TransferKind,
    /// Requested payload size in bytes; clamped server-side.
    pub size: u64,
}

/// Transfer kinds a JSON request may describe. Uploads are raw
/// octet-stream bodies instead and never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Download,
}

/// JSON acknowledgment returned after a completed upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: String,
    /// Bytes received.
    pub size: u64,
    /// Server-side receive window, milliseconds.
    pub duration: f64,
    /// Server-computed upload speed, Mbps, floored at a small positive
    /// minimum.
    pub speed: f64,
}

/// Capabilities document served on `GET /transfer`, used by clients to
/// self-configure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server: String,
    pub version: String,
    pub tests: Vec<String>,
    #[serde(rename = "minFileSize")]
    pub min_file_size: u64,
    #[serde(rename = "maxFileSize")]
    pub max_file_size: u64,
    #[serde(rename = "maxUploadSize")]
    pub max_upload_size: u64,
}

/// Shared cancellation flag for one test run.
///
/// Observable by the in-flight timed exchange (between body chunks) and by
/// the collector between attempts, so cancellation stops remaining targets
/// immediately rather than draining the list.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
