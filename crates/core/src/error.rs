//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid chunk name: {0}")]
    InvalidChunkName(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("invalid upload state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::upload::UploadState,
        to: crate::upload::UploadState,
    },

    #[error("upload session error: {0}")]
    UploadSession(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
