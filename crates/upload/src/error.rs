//! Error types for the upload pipeline.

use piecestash_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Upload error type.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Session negotiation failed. Never retried.
    #[error("session negotiation failed: {0}")]
    Negotiation(String),

    /// Reading the source object failed; the pipeline is aborted.
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {status} for {range}: {body}")]
    UnexpectedStatus {
        status: u16,
        range: String,
        body: String,
    },

    /// The remote answered in a way the range protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("gave up on range at offset {offset} after {attempts} attempts: {last}")]
    RetriesExhausted {
        offset: u64,
        attempts: u32,
        last: Box<UploadError>,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload already in progress: {0}")]
    AlreadyInProgress(String),

    #[error("piece is not complete: {0}")]
    PieceIncomplete(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] piecestash_core::Error),

    #[error("upload task failed: {0}")]
    Task(String),
}

impl UploadError {
    /// Whether resending the same range may succeed.
    ///
    /// Transport failures, timeouts, throttling and server errors qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Http(_) | UploadError::Timeout(_) => true,
            UploadError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for upload operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
